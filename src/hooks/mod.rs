mod dispatch;
mod registry;

pub use dispatch::{DispatchPlan, render_panel, render_slot};
pub use registry::HookRegistry;
