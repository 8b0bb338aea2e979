pub mod admin;
pub mod list;
pub mod publish;
pub mod serve;
