pub mod tsh;
