//! Reference resolution over the attachment graph of a root object.
//!
//! Two views of the same walk:
//!
//! - [`ReferenceWalker`] pulls one attachment at a time, depth first, and
//!   stops at the first hole. Use it when any hole means failure.
//! - [`ReferenceResolver::missing_references`] visits everything reachable
//!   and collects *every* hole into a [`NeedsList`]. PUT and FINALIZE use it
//!   to tell clients what to upload next.
//!
//! Holes are reported as data, never collapsed: a missing blob
//! ([`RefError::MissingBlobs`]), a content id that does not fully resolve
//! ([`RefError::PartialContentId`]), and a root object that cannot be
//! fetched at all ([`RefError::BlobNotFound`]) are separate conditions.

use std::collections::HashSet;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use ddc_object::{Attachment, DdcObject};
use ddc_store::{BlobStore, ContentService, StoreError};
use ddc_types::{BlobId, ContentHash, ContentId, NamespaceId};

use crate::error::{RefError, RefResult};

/// Concurrent attachment checks per level of the graph.
const CHECK_CONCURRENCY: usize = 16;

/// How far [`ReferenceResolver::missing_references`] descends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkDepth {
    /// Only the root's own attachments.
    Direct,
    /// Everything reachable through object attachments.
    Transitive,
}

/// Referenced content that is not yet present.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeedsList {
    pub blobs: Vec<BlobId>,
    pub content_ids: Vec<ContentId>,
}

impl NeedsList {
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty() && self.content_ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.blobs.len() + self.content_ids.len()
    }

    /// Every needed hash, content ids first.
    pub fn hashes(&self) -> Vec<ContentHash> {
        self.content_ids
            .iter()
            .map(ContentId::hash)
            .chain(self.blobs.iter().map(BlobId::hash))
            .collect()
    }
}

/// One attachment reached by a walk, with the blobs that back it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedAttachment {
    pub attachment: Attachment,
    /// The blob itself for binary and object attachments; the chunk list
    /// for content ids.
    pub blobs: Vec<BlobId>,
}

enum Check {
    Present {
        children: Vec<Attachment>,
    },
    MissingBlob(BlobId),
    MissingContent(ContentId),
}

/// Resolves attachment graphs against a namespace's blobs and content ids.
#[derive(Clone)]
pub struct ReferenceResolver {
    content: ContentService,
}

impl ReferenceResolver {
    pub fn new(content: ContentService) -> Self {
        Self { content }
    }

    fn blobs(&self) -> &dyn BlobStore {
        self.content.blobs().as_ref()
    }

    /// Start a walk over an already decoded root.
    pub fn walk<'a>(&'a self, namespace: &'a NamespaceId, root: &DdcObject) -> ReferenceWalker<'a> {
        ReferenceWalker::new(self, namespace, root.attachments())
    }

    /// Fetch and decode a root object, then start a walk over it.
    ///
    /// Fails with [`RefError::BlobNotFound`] if the root itself is absent.
    pub async fn walk_root<'a>(
        &'a self,
        namespace: &'a NamespaceId,
        root: &BlobId,
    ) -> RefResult<ReferenceWalker<'a>> {
        let bytes = match self.blobs().get(namespace, root, None).await {
            Ok(bytes) => bytes,
            Err(StoreError::BlobNotFound { .. }) => {
                return Err(RefError::BlobNotFound {
                    namespace: namespace.clone(),
                    id: *root,
                })
            }
            Err(e) => return Err(e.into()),
        };
        let object = DdcObject::from_bytes(&bytes)?;
        Ok(self.walk(namespace, &object))
    }

    /// Every blob the root transitively references, in walk order.
    pub async fn get_referenced_blobs(
        &self,
        namespace: &NamespaceId,
        root: &DdcObject,
    ) -> RefResult<Vec<BlobId>> {
        let mut walker = self.walk(namespace, root);
        let mut out = Vec::new();
        while let Some(resolved) = walker.next().await? {
            out.extend(resolved.blobs);
        }
        Ok(out)
    }

    /// Every attachment the root transitively reaches, in walk order.
    pub async fn get_attachments(
        &self,
        namespace: &NamespaceId,
        root: &DdcObject,
    ) -> RefResult<Vec<Attachment>> {
        let mut walker = self.walk(namespace, root);
        let mut out = Vec::new();
        while let Some(resolved) = walker.next().await? {
            out.push(resolved.attachment);
        }
        Ok(out)
    }

    /// Collect every missing blob and content id reachable from `root`.
    ///
    /// A content id is listed when it does not resolve or when any of its
    /// chunks is absent. An object attachment whose blob is present is
    /// descended into only for [`WalkDepth::Transitive`].
    pub async fn missing_references(
        &self,
        namespace: &NamespaceId,
        root: &DdcObject,
        depth: WalkDepth,
    ) -> RefResult<NeedsList> {
        let mut needs = NeedsList::default();
        let mut seen = HashSet::new();
        let mut frontier: Vec<Attachment> = root.attachments();

        while !frontier.is_empty() {
            let level: Vec<Attachment> = frontier
                .drain(..)
                .filter(|a| seen.insert(a.hash()))
                .collect();
            let checks: Vec<Check> = stream::iter(level)
                .map(|a| self.check(namespace, a, depth))
                .buffered(CHECK_CONCURRENCY)
                .try_collect()
                .await?;

            for check in checks {
                match check {
                    Check::Present { children } => frontier.extend(children),
                    Check::MissingBlob(id) => needs.blobs.push(id),
                    Check::MissingContent(id) => needs.content_ids.push(id),
                }
            }
        }
        Ok(needs)
    }

    async fn check(
        &self,
        namespace: &NamespaceId,
        attachment: Attachment,
        depth: WalkDepth,
    ) -> RefResult<Check> {
        match attachment {
            Attachment::Binary(id) => Ok(if self.blobs().exists(namespace, &id).await? {
                Check::Present {
                    children: Vec::new(),
                }
            } else {
                Check::MissingBlob(id)
            }),
            Attachment::Object(id) => {
                if depth == WalkDepth::Direct {
                    return Ok(if self.blobs().exists(namespace, &id).await? {
                        Check::Present {
                            children: Vec::new(),
                        }
                    } else {
                        Check::MissingBlob(id)
                    });
                }
                match self.blobs().get(namespace, &id, None).await {
                    Ok(bytes) => Ok(Check::Present {
                        children: DdcObject::from_bytes(&bytes)?.attachments(),
                    }),
                    Err(StoreError::BlobNotFound { .. }) => Ok(Check::MissingBlob(id)),
                    Err(e) => Err(e.into()),
                }
            }
            Attachment::Content(id) => Ok(
                if self.content.presence(namespace, &id, false).await?.is_present() {
                    Check::Present {
                        children: Vec::new(),
                    }
                } else {
                    Check::MissingContent(id)
                },
            ),
        }
    }
}

/// Pull-based, depth-first walk of an attachment graph.
///
/// Each call to [`next`](Self::next) resolves one attachment. The walk stops
/// at the first hole and is not restartable: after an error, `next` returns
/// `Ok(None)`. Shared sub-graphs are visited once.
pub struct ReferenceWalker<'a> {
    resolver: &'a ReferenceResolver,
    namespace: &'a NamespaceId,
    stack: Vec<Attachment>,
    visited: HashSet<ContentHash>,
    done: bool,
}

impl<'a> ReferenceWalker<'a> {
    fn new(
        resolver: &'a ReferenceResolver,
        namespace: &'a NamespaceId,
        mut roots: Vec<Attachment>,
    ) -> Self {
        roots.reverse();
        Self {
            resolver,
            namespace,
            stack: roots,
            visited: HashSet::new(),
            done: false,
        }
    }

    /// Resolve the next attachment.
    pub async fn next(&mut self) -> RefResult<Option<ResolvedAttachment>> {
        if self.done {
            return Ok(None);
        }
        let result = self.step().await;
        if !matches!(result, Ok(Some(_))) {
            self.done = true;
        }
        result
    }

    async fn step(&mut self) -> RefResult<Option<ResolvedAttachment>> {
        let attachment = loop {
            match self.stack.pop() {
                None => return Ok(None),
                Some(a) if self.visited.insert(a.hash()) => break a,
                Some(_) => continue,
            }
        };
        let namespace = self.namespace;
        let resolver = self.resolver;
        let blobs = resolver.blobs();

        let backing = match attachment {
            Attachment::Binary(id) => {
                if !blobs.exists(namespace, &id).await? {
                    return Err(missing_blob(namespace, id));
                }
                vec![id]
            }
            Attachment::Object(id) => {
                let bytes = match blobs.get(namespace, &id, None).await {
                    Ok(bytes) => bytes,
                    Err(StoreError::BlobNotFound { .. }) => {
                        return Err(missing_blob(namespace, id))
                    }
                    Err(e) => return Err(e.into()),
                };
                let children = DdcObject::from_bytes(&bytes)?.attachments();
                self.stack.extend(children.into_iter().rev());
                vec![id]
            }
            Attachment::Content(id) => {
                let Some(chunks) = resolver.content.resolve(namespace, &id, false).await? else {
                    return Err(RefError::PartialContentId {
                        namespace: namespace.clone(),
                        id,
                        missing: Vec::new(),
                    });
                };
                let missing = blobs.filter_unknown(namespace, &chunks).await?;
                if !missing.is_empty() {
                    return Err(RefError::PartialContentId {
                        namespace: namespace.clone(),
                        id,
                        missing,
                    });
                }
                chunks
            }
        };
        Ok(Some(ResolvedAttachment {
            attachment,
            blobs: backing,
        }))
    }
}

fn missing_blob(namespace: &NamespaceId, id: BlobId) -> RefError {
    RefError::MissingBlobs {
        namespace: namespace.clone(),
        blobs: vec![id],
    }
}
