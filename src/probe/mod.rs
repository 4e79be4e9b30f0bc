pub mod checksum;
pub mod correlate;
pub mod icmp;
pub mod protocol;
pub mod socket;

pub use checksum::*;
pub use correlate::*;
pub use icmp::*;
pub use protocol::*;
pub use socket::*;
