mod table;

pub use table::{Sst, SstScanner, SstState};
