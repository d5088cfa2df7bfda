// Models module - Database entity representations

pub mod account;
pub mod certification;
pub mod device;
pub mod guest;
pub mod log_event;
pub mod member;
pub mod report;
pub mod setting;
pub mod team;
pub mod unlock;
pub mod visit;

pub use account::{Account, Role};
pub use certification::{Certification, CertificationLevel};
pub use device::Device;
pub use guest::Guest;
pub use log_event::LogEvent;
pub use member::Member;
pub use report::Report;
pub use setting::Setting;
pub use team::{Team, TeamMemberType};
pub use unlock::Unlock;
pub use visit::{Visit, VisitStatus};
