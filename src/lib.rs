pub mod collect;
pub mod pipeline;
pub mod table;
