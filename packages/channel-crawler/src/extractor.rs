//! Reference extraction from a single content item.

use crate::classifier::{classify, RawReference};
use crate::types::{ContentItem, EntityKind, ForwardOrigin, Locator, ReferenceKind};

/// All outbound references of an item, unclassified.
///
/// A forward from a channel yields one `Forward` reference to the origin.
/// Mention, text-URL and bare-URL entities each yield a `LinkOrMention`
/// reference; forwarded captions are scanned the same way.
pub fn extract_references(
    item: &ContentItem,
) -> impl Iterator<Item = (RawReference, ReferenceKind)> + '_ {
    let forward = match &item.forward {
        Some(ForwardOrigin::Channel { channel_id }) => {
            Some((RawReference::ChannelId(*channel_id), ReferenceKind::Forward))
        }
        _ => None,
    };

    let entities = item.entities.iter().filter_map(move |entity| {
        let raw = match &entity.kind {
            EntityKind::Mention | EntityKind::Url => item.entity_text(entity)?,
            EntityKind::TextUrl { url } => url.clone(),
            EntityKind::Other => return None,
        };
        Some((RawReference::Text(raw), ReferenceKind::LinkOrMention))
    });

    forward.into_iter().chain(entities)
}

/// References of an item that classify into a locator; the rest are dropped.
pub fn classified_references(
    item: &ContentItem,
) -> impl Iterator<Item = (Locator, ReferenceKind)> + '_ {
    extract_references(item).filter_map(move |(raw, kind)| match classify(&raw) {
        Some(locator) => Some((locator, kind)),
        None => {
            tracing::trace!(item_id = item.id, reference = ?raw, "Unclassifiable reference dropped");
            None
        }
    })
}
