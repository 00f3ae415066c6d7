//! Parser for WizNote's internal `wiz://` links.
//!
//! ```text
//! wiz://open_document/?guid=bda9f178-...&kbguid=&private_kbguid=3d25...
//! wiz://open_attachment?guid=52a00459-...
//! ```

use tracing::{error, warn};
use url::Url;

pub const WIZ_SCHEME: &str = "wiz";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Note,
    Attachment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalLink {
    /// Guid of the linked note or attachment.
    pub guid: String,
    pub kind: LinkKind,
}

impl InternalLink {
    /// Parse an href. Anything that is not a well-formed `wiz://` link is
    /// logged and yields `None`.
    pub fn parse(href: &str) -> Option<Self> {
        let url = match Url::parse(href) {
            Ok(url) => url,
            Err(e) => {
                error!("malformed internal link `{}`: {}", href, e);
                return None;
            }
        };
        if url.scheme() != WIZ_SCHEME {
            error!("internal link must start with `wiz://`: `{}`", href);
            return None;
        }

        let kind = match url.host_str() {
            Some("open_document") => LinkKind::Note,
            Some("open_attachment") => LinkKind::Attachment,
            other => {
                warn!("unsupported internal link kind {:?}: `{}`", other, href);
                return None;
            }
        };

        let guid = url
            .query_pairs()
            .find(|(key, _)| key == "guid")
            .map(|(_, value)| value.into_owned())
            .filter(|guid| !guid.is_empty());
        match guid {
            Some(guid) => Some(Self { guid, kind }),
            None => {
                error!("internal link without guid: `{}`", href);
                None
            }
        }
    }
}
