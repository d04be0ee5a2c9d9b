mod client;
mod oauth;

pub use client::{
    About, AboutUser, ApiErrorClass, DriveClient, DriveError, DriveFile, FOLDER_MIME_TYPE,
    FileLabels, FileList, ParentReference,
};
pub use oauth::{ClientSecrets, DRIVE_READONLY_SCOPE, OAuthClient, OAuthError, OAuthToken};
