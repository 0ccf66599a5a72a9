pub mod icons;
pub mod output;
pub mod progress;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{
    dim, error, header, human_age, human_bytes, info, muted, section, status, success, summary_row,
    warn,
};
pub use progress::Spinner;
pub use table::{snapshot_table, tables_table, TableBuilder};
pub use theme::{theme, Theme};
