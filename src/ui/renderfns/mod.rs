pub mod command_overlay;
pub mod footer;
pub mod header;
pub mod utils;

pub use command_overlay::draw_command_overlay;
pub use footer::draw_footer;
pub use header::{draw_header, extract_domain};
pub use utils::{format_interval, log_color, progress_bar, status_color, task_state_color, truncate};
