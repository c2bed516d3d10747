//! Repositories for database access.

mod feed;
mod following;
mod post;
mod user;

pub use feed::FeedRepository;
pub use following::FollowingRepository;
pub use post::PostRepository;
pub use user::UserRepository;
