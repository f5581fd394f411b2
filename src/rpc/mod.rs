pub mod bor;
