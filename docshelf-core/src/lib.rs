mod client;

pub use client::{
    ApiErrorClass, DocshelfClient, DocshelfError, FileRecord, FolderNode, FolderRecord,
};
