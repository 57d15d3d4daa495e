// CLI subcommands

pub mod cancel;
pub mod feed;
pub mod load;
pub mod saturate;
pub mod single_flight;
pub mod terminate;
