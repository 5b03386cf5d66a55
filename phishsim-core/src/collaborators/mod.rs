//! External collaborators consumed by the campaign engine.
//!
//! Each is a trait so services stay testable without the real system:
//! mail transport, user directory, and the course-progress service. The
//! default implementations speak JSON over HTTP via reqwest.

pub mod mail;
pub mod directory;
pub mod course;

pub use mail::{HttpMailTransport, MailTransport};
pub use directory::{HttpUserDirectory, UserDirectory};
pub use course::{CourseProgress, HttpCourseProgress};
