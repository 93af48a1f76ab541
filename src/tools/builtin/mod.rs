//! Native reference tools bundled with the registry (§10.5): `echo`,
//! `read_file`, `write_file`. A real deployment registers more; these three
//! are enough to exercise the full C6 pipeline end to end.

mod echo;
mod read_file;
mod write_file;

pub use echo::EchoTool;
pub use read_file::ReadFileTool;
pub use write_file::WriteFileTool;
