//! Database entities.

pub mod feed_entry;
pub mod following;
pub mod post;
pub mod user;

pub use feed_entry::Entity as FeedEntry;
pub use following::Entity as Following;
pub use post::Entity as Post;
pub use user::Entity as User;
