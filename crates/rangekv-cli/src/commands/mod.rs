pub mod report;
pub mod run;
pub mod score;
pub mod seed;
pub mod simulate;
