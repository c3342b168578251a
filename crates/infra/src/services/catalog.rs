//! Authors, publishers, books and their author links.

use std::sync::Arc;

use tracing::{info, instrument};

use catalog_audit::{AuditAction, AuditWriter};
use catalog_catalog::{
    Author, AuthorDraft, AuthorPatch, Book, BookAuthor, BookAuthorDraft, BookDraft, Publisher,
    PublisherDraft,
};
use catalog_core::{Entity, RecordId};

use crate::backend::{Backend, Filter, Relation};
use crate::error::{StoreError, StoreResult};
use crate::store::{AuditOptions, Deleted, EntityStore, Page, Pagination, Transform, UniqueConstraint};
use crate::transaction::{TransactionCoordinator, TransactionOptions};

pub const AUTHOR_NAME_TAKEN: &str = "An author with this name already exists";
pub const PUBLISHER_NAME_TAKEN: &str = "A publisher with this name already exists";
pub const ISBN_TAKEN: &str = "A book with this ISBN already exists";
pub const AUTHOR_ALREADY_LINKED: &str = "This author is already linked to this book";

fn author_name_unique() -> UniqueConstraint {
    UniqueConstraint::single("name", AUTHOR_NAME_TAKEN).transform("name", Transform::TrimLowercase)
}

fn publisher_name_unique() -> UniqueConstraint {
    UniqueConstraint::single("name", PUBLISHER_NAME_TAKEN).transform("name", Transform::TrimLowercase)
}

fn isbn_unique() -> UniqueConstraint {
    UniqueConstraint::single("isbn", ISBN_TAKEN)
}

fn link_unique() -> UniqueConstraint {
    UniqueConstraint::compound(["book_id", "author_id"], AUTHOR_ALREADY_LINKED)
}

/// Eager-load a book's publisher under `publisher`.
pub fn publisher_relation() -> Relation {
    Relation::new("publisher_id", Publisher::ENTITY_NAME, "publisher")
}

async fn require<T: Entity>(store: &EntityStore<T>, id: RecordId) -> StoreResult<T> {
    store
        .find_by_id(id)
        .await?
        .ok_or_else(|| StoreError::not_found(T::ENTITY_NAME, id))
}

#[derive(Debug, Clone)]
pub struct CatalogService {
    coordinator: TransactionCoordinator,
    authors: EntityStore<Author>,
    publishers: EntityStore<Publisher>,
    books: EntityStore<Book>,
    links: EntityStore<BookAuthor>,
}

impl CatalogService {
    pub fn new(backend: Arc<dyn Backend>, audit: AuditWriter) -> Self {
        Self {
            coordinator: TransactionCoordinator::new(backend.clone(), audit.clone()),
            authors: EntityStore::with_audit(backend.clone(), audit.clone()),
            publishers: EntityStore::with_audit(backend.clone(), audit.clone()),
            books: EntityStore::with_audit(backend.clone(), audit.clone()),
            links: EntityStore::with_audit(backend, audit),
        }
    }

    pub fn authors(&self) -> &EntityStore<Author> {
        &self.authors
    }

    pub fn books(&self) -> &EntityStore<Book> {
        &self.books
    }

    #[instrument(skip(self, draft), fields(name = %draft.name), err)]
    pub async fn create_author(&self, draft: AuthorDraft, performed_by: &str) -> StoreResult<Author> {
        draft.validate()?;
        self.authors
            .validate_unique_constraints(&draft, None, &[author_name_unique()])
            .await?;

        let audit = AuditOptions::new(performed_by, Author::ENTITY_NAME)
            .describe(|a: &Author| format!("Created author {}", a.name));
        self.authors.create(&draft, Some(audit)).await
    }

    /// Rename, checking the new name against every other author.
    #[instrument(skip(self), err)]
    pub async fn rename_author(&self, id: RecordId, name: &str, performed_by: &str) -> StoreResult<Author> {
        let patch = AuthorPatch {
            name: Some(name.to_string()),
            ..AuthorPatch::default()
        };
        patch.validate()?;
        self.authors
            .validate_unique_constraints(&patch, Some(id), &[author_name_unique()])
            .await?;

        let audit = AuditOptions::new(performed_by, Author::ENTITY_NAME)
            .describe(|a: &Author| format!("Renamed author to {}", a.name));
        self.authors.update(id, &patch, Some(audit)).await
    }

    #[instrument(skip(self, draft), fields(name = %draft.name), err)]
    pub async fn create_publisher(&self, draft: PublisherDraft, performed_by: &str) -> StoreResult<Publisher> {
        draft.validate()?;
        self.publishers
            .validate_unique_constraints(&draft, None, &[publisher_name_unique()])
            .await?;

        let audit = AuditOptions::new(performed_by, Publisher::ENTITY_NAME)
            .describe(|p: &Publisher| format!("Created publisher {}", p.name));
        self.publishers.create(&draft, Some(audit)).await
    }

    #[instrument(skip(self, draft), fields(isbn = %draft.isbn), err)]
    pub async fn create_book(&self, mut draft: BookDraft, performed_by: &str) -> StoreResult<Book> {
        draft.validate()?;
        if let Some(publisher_id) = draft.publisher_id {
            require(&self.publishers, publisher_id).await?;
        }
        self.books
            .validate_unique_constraints(&draft, None, &[isbn_unique()])
            .await?;

        self.books.create(&draft, Some(book_audit(performed_by))).await
    }

    /// Create a book and link its authors in one transaction; any failure
    /// leaves neither the book nor any link behind.
    #[instrument(skip(self, draft, author_ids), fields(isbn = %draft.isbn, authors = author_ids.len()), err)]
    pub async fn create_book_with_authors(
        &self,
        mut draft: BookDraft,
        author_ids: &[RecordId],
        performed_by: &str,
    ) -> StoreResult<(Book, Vec<BookAuthor>)> {
        draft.validate()?;

        let options = TransactionOptions::named("create_book_with_authors")
            .audited(performed_by, Book::ENTITY_NAME)
            .action(AuditAction::Create);

        let (book, links) = self
            .coordinator
            .with_transaction(options, move |tx| async move {
                let books = self.books.in_transaction(&tx);
                let links = self.links.in_transaction(&tx);
                let authors = self.authors.in_transaction(&tx);

                if let Some(publisher_id) = draft.publisher_id {
                    require(&self.publishers.in_transaction(&tx), publisher_id).await?;
                }
                books
                    .validate_unique_constraints(&draft, None, &[isbn_unique()])
                    .await?;
                let book = books.create(&draft, Some(book_audit(performed_by))).await?;

                let mut created = Vec::with_capacity(author_ids.len());
                for author_id in author_ids {
                    require(&authors, *author_id).await?;
                    let link = BookAuthorDraft {
                        book_id: book.id,
                        author_id: *author_id,
                    };
                    links
                        .validate_unique_constraints(&link, None, &[link_unique()])
                        .await?;
                    created.push(links.create(&link, Some(link_audit(performed_by))).await?);
                }
                Ok((book, created))
            })
            .await?;

        info!(book_id = %book.id, links = links.len(), "book created with authors");
        Ok((book, links))
    }

    /// Link an existing author to an existing book. Each pair may be linked
    /// once.
    #[instrument(skip(self), err)]
    pub async fn link_author(
        &self,
        book_id: RecordId,
        author_id: RecordId,
        performed_by: &str,
    ) -> StoreResult<BookAuthor> {
        require(&self.books, book_id).await?;
        require(&self.authors, author_id).await?;

        let link = BookAuthorDraft { book_id, author_id };
        self.links
            .validate_unique_constraints(&link, None, &[link_unique()])
            .await?;
        self.links.create(&link, Some(link_audit(performed_by))).await
    }

    #[instrument(skip(self), err)]
    pub async fn archive_book(&self, id: RecordId, performed_by: &str) -> StoreResult<Deleted> {
        let audit = AuditOptions::new(performed_by, Book::ENTITY_NAME)
            .describe(|b: &Book| format!("Archived book {} ({})", b.title, b.isbn));
        self.books.soft_delete(id, Some(audit)).await
    }

    /// One page of live books with their publisher embedded.
    pub async fn list_books(&self, pagination: &Pagination) -> StoreResult<Page<Book>> {
        let filter = Filter::new().with_relation(publisher_relation());
        self.books.find_many_paged(filter, pagination).await
    }

    /// Live authors linked to `book_id`.
    pub async fn authors_of(&self, book_id: RecordId) -> StoreResult<Vec<Author>> {
        let links = self
            .links
            .find_many(Filter::new().eq("book_id", book_id.to_string()))
            .await?;

        let mut authors = Vec::with_capacity(links.len());
        for link in links {
            if let Some(author) = self.authors.find_by_id(link.author_id).await? {
                authors.push(author);
            }
        }
        authors.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(authors)
    }
}

fn book_audit(performed_by: &str) -> AuditOptions<Book> {
    AuditOptions::new(performed_by, Book::ENTITY_NAME)
        .describe(|b: &Book| format!("Created book {} ({})", b.title, b.isbn))
}

fn link_audit(performed_by: &str) -> AuditOptions<BookAuthor> {
    AuditOptions::new(performed_by, BookAuthor::ENTITY_NAME)
        .describe(|l: &BookAuthor| format!("Linked author {} to book {}", l.author_id, l.book_id))
}
