use std::collections::HashSet;

use bytes::Bytes;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::RemoteObjectStoreConfig;

use super::{local::MANIFEST_EXTENSION, LoaderError, RemoteManifestSource};

const MAX_LISTING_PAGES: usize = 1000;

#[derive(Deserialize, Debug)]
struct ObjectListing {
  #[serde(default)]
  items: Vec<ObjectListingItem>,
  #[serde(rename = "nextPageToken", default)]
  next_page_token: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ObjectListingItem {
  name: String,
}

/// Mirrors `*.json` objects found directly under a bucket prefix into a local
/// staging directory, using the object storage JSON API
/// (`/storage/v1/b/{bucket}/o`).
#[derive(Debug)]
pub struct RemoteObjectStoreLoader {
  config: RemoteObjectStoreConfig,
  client: Client,
}

impl RemoteObjectStoreLoader {
  pub fn new(config: RemoteObjectStoreConfig) -> Result<Self, LoaderError> {
    let client = Client::builder()
      .connect_timeout(config.timeout)
      .timeout(config.timeout)
      .build()?;

    Ok(Self { config, client })
  }

  fn objects_url(&self) -> String {
    format!(
      "{}/storage/v1/b/{}/o",
      self.config.base_url.trim_end_matches('/'),
      urlencoding::encode(&self.config.bucket)
    )
  }

  fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
    match &self.config.bearer_token {
      Some(token) => request.bearer_auth(token),
      None => request,
    }
  }

  /// The file name an object should be staged under, when it is a manifest
  /// sitting directly under the configured prefix.
  fn manifest_file_name<'a>(&self, object_name: &'a str) -> Option<&'a str> {
    let relative = object_name.strip_prefix(self.config.prefix.as_str())?;

    if relative.is_empty() || relative.contains('/') {
      return None;
    }

    let extension = format!(".{}", MANIFEST_EXTENSION);
    relative.ends_with(&extension).then_some(relative)
  }

  async fn list_objects(&self) -> Result<Vec<String>, LoaderError> {
    let url = self.objects_url();
    let mut names = vec![];
    let mut page_token: Option<String> = None;
    let mut seen_tokens = HashSet::new();

    for _ in 0..MAX_LISTING_PAGES {
      let mut query = vec![("prefix", self.config.prefix.clone())];
      if let Some(token) = &page_token {
        query.push(("pageToken", token.clone()));
      }

      let response = self
        .authorized(self.client.get(&url).query(&query))
        .send()
        .await?;

      if !response.status().is_success() {
        return Err(LoaderError::RemoteStatus {
          url,
          status: response.status(),
        });
      }

      let listing = response.json::<ObjectListing>().await?;
      names.extend(listing.items.into_iter().map(|item| item.name));

      match listing.next_page_token {
        Some(token) if !token.is_empty() => {
          // a token we already followed would list the same pages again
          if !seen_tokens.insert(token.clone()) {
            break;
          }

          page_token = Some(token);
        }
        _ => return Ok(names),
      }
    }

    Err(LoaderError::UnterminatedListing {
      url,
      pages: seen_tokens.len() + 1,
    })
  }

  async fn download(&self, object_name: &str) -> Result<Bytes, LoaderError> {
    let url = format!("{}/{}", self.objects_url(), urlencoding::encode(object_name));
    let response = self
      .authorized(self.client.get(&url).query(&[("alt", "media")]))
      .send()
      .await?;

    if !response.status().is_success() {
      return Err(LoaderError::RemoteStatus {
        url,
        status: response.status(),
      });
    }

    Ok(response.bytes().await?)
  }
}

#[async_trait::async_trait]
impl RemoteManifestSource for RemoteObjectStoreLoader {
  async fn pull(&self) -> Result<usize, LoaderError> {
    let local_path = &self.config.local_path;

    tokio::fs::create_dir_all(local_path)
      .await
      .map_err(|source| LoaderError::WriteManifest {
        path: local_path.clone(),
        source,
      })?;

    let objects = self.list_objects().await?;
    let mut downloaded = 0;

    for object_name in objects.iter() {
      let Some(file_name) = self.manifest_file_name(object_name) else {
        debug!("skipping non-manifest object {:?}", object_name);
        continue;
      };

      let contents = self.download(object_name).await?;
      let target = local_path.join(file_name);

      tokio::fs::write(&target, &contents)
        .await
        .map_err(|source| LoaderError::WriteManifest {
          path: target.clone(),
          source,
        })?;

      downloaded += 1;
    }

    info!(
      "pulled {} persisted operations manifests from bucket {:?} into {:?}",
      downloaded, self.config.bucket, local_path
    );

    Ok(downloaded)
  }
}
