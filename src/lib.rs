pub mod error;
pub mod fetch;
pub mod history;
pub mod live;
pub mod location;
pub mod report;
pub mod roster;
pub mod runner;
pub mod trip;
