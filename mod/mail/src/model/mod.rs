mod course;
mod ids;
mod label;
mod message;
mod user;

pub use course::{Course, Group, GroupMode};
pub use ids::{CourseId, GroupId, LabelId, MessageId, UserId};
pub use label::{normalized_name, Color, Label};
pub use message::{
    normalize_text, DeletedStatus, Message, MessageData, Participant, Role, TextFormat,
};
pub use user::User;
