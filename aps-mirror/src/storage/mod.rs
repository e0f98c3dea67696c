mod mirror_store;

pub use mirror_store::{
    ContentInput, ContentKind, ContentRecord, HubRecord, MirrorStore, ProjectInput, ProjectRecord,
    StoreError, TokenKind, TokenRecord, ViewerFields, now_unix,
};
