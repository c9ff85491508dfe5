//! Machine files and the `.grd` cell format embedded in them.

mod cells;
mod machine_file;

pub use cells::{parse_grd_content, write_grd_content};
pub use machine_file::{
    MachineFile, SheetFile, load_machine, parse_machine, read_functions_file, save_machine,
};
