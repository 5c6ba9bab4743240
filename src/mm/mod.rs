pub mod frame_pool;
pub mod page;
pub mod pctx;
pub mod uaccess;

#[cfg(target_os = "none")]
pub mod heap;

pub use frame_pool::{FramePool, FRAME_SIZE};
pub use page::USER_SPACE_TOP;
pub use pctx::{PctxTable, PCTX_COUNT};
