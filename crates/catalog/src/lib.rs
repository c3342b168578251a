//! Catalog domain module: authors, publishers, books and their links.
//!
//! Pure record types plus input validation (no IO, no storage).

pub mod author;
pub mod book;
pub mod publisher;

pub use author::{Author, AuthorDraft, AuthorPatch};
pub use book::{Book, BookAuthor, BookAuthorDraft, BookDraft, BookPatch, NoPatch, normalize_isbn};
pub use publisher::{Publisher, PublisherDraft, PublisherPatch};
