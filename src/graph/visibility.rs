use crate::core::errors::ApiError;
use crate::graph::store::RelationshipStore;
use crate::models::models::{Post, User};

/// Whether `viewer` may read `target`'s profile fields and posts.
///
/// Public accounts are open to everyone, anonymous viewers included. A private
/// account is visible to itself and to viewers that sit in both its
/// `followers` and its `following`; an accepted one-way follower is not enough.
pub fn can_view(graph: &RelationshipStore, viewer: Option<&str>, target: &User) -> anyhow::Result<bool> {
    if !target.is_private {
        return Ok(true);
    }
    let Some(viewer) = viewer else {
        return Ok(false);
    };
    if viewer == target.id {
        return Ok(true);
    }
    let rel = graph.load(&target.id, viewer)?;
    let side = rel.side(&target.id);
    Ok(side.follower && side.following)
}

pub fn ensure_can_view(graph: &RelationshipStore, viewer: Option<&str>, target: &User) -> Result<(), ApiError> {
    if can_view(graph, viewer, target)? {
        Ok(())
    } else {
        Err(ApiError::forbidden(
            "This profile is private. Only mutual followers can view.",
        ))
    }
}

/// A post is readable when it is public and its author is viewable; authors
/// always see their own posts.
pub fn can_view_post(
    graph: &RelationshipStore,
    viewer: Option<&str>,
    post: &Post,
    author: &User,
) -> anyhow::Result<bool> {
    if viewer == Some(author.id.as_str()) {
        return Ok(true);
    }
    Ok(post.is_public && can_view(graph, viewer, author)?)
}
