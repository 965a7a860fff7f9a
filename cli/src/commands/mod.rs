//! CLI Commands

mod calculate;
mod init;
mod networks;

pub use calculate::CalculateCommand;
pub use init::InitCommand;
pub use networks::NetworksCommand;
