use std::future::Future;

use anyhow::{Context, Result, anyhow};
use bson::{Bson, Document, doc};
use mongodb::Client;
use mongodb::options::ClientOptions;
use tracing::{info, warn};

use crate::config::MongoConfig;

/// Supplies one `currentOp` snapshot per tick.
///
/// An `Err` means the feed itself is unusable; the poll loop treats it as
/// fatal.
pub trait SnapshotSource: Send {
    fn fetch(&mut self) -> impl Future<Output = Result<Vec<Document>>> + Send;
}

/// Snapshot source backed by `db.currentOp({ $all: true })` on `admin`.
pub struct MongoSource {
    client: Client,
}

impl MongoSource {
    /// Connect and ping so a bad URI or credentials fail at startup.
    pub async fn connect(config: &MongoConfig) -> Result<Self> {
        let uri = config.connection_uri()?;
        let mut options = ClientOptions::parse(&uri)
            .await
            .context("invalid MongoDB connection string supplied")?;
        options.app_name = Some("mongoslow".to_string());

        let client = Client::with_options(options).context("failed to build MongoDB client")?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .context("failed to ping MongoDB")?;

        info!("connected to mongodb");
        Ok(Self { client })
    }
}

impl SnapshotSource for MongoSource {
    async fn fetch(&mut self) -> Result<Vec<Document>> {
        let reply = self
            .client
            .database("admin")
            .run_command(doc! { "currentOp": 1, "$all": true })
            .await
            .context("currentOp command failed")?;
        in_progress(reply)
    }
}

/// Extract the `inprog` array from a `currentOp` reply.
///
/// A missing or mistyped `inprog` is an error; individual non-document
/// entries are dropped with a warning.
pub fn in_progress(mut reply: Document) -> Result<Vec<Document>> {
    let entries = match reply.remove("inprog") {
        Some(Bson::Array(entries)) => entries,
        Some(other) => {
            return Err(anyhow!(
                "currentOp reply field inprog is {:?}, expected an array",
                other.element_type()
            ));
        }
        None => return Err(anyhow!("currentOp reply is missing the inprog field")),
    };

    let mut documents = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry {
            Bson::Document(document) => documents.push(document),
            other => warn!(kind = ?other.element_type(), "ignoring non-document inprog entry"),
        }
    }
    Ok(documents)
}
