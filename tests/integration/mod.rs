//! Integration tests for recording, importing and playing back workspaces

mod importer;
mod materialize;
mod support;
mod timeline;
