//! Test doubles: an in-memory `/proc`, a scripted PostgreSQL connection and
//! fixtures for both.

mod connection;
mod filesystem;
mod scenarios;

pub use connection::MockConnection;
pub use filesystem::MockFs;
pub use scenarios::statement_row;
