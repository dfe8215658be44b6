use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::protocol::error::ErrorKind;

/// URI scheme of every service name.
const SCHEME: &str = "fabric:/";

/// A service name URI, e.g. `fabric:/app/svc`.
///
/// A trailing `#fragment` names a service-group member. Cache keys always
/// use the fragment-stripped form ([`ServiceName::without_member`]); the
/// original name is kept around for member extraction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceName {
    uri: String,
}

impl ServiceName {
    /// Full URI including any member fragment.
    pub fn as_str(&self) -> &str {
        &self.uri
    }

    /// The service-group member fragment, if any.
    pub fn member(&self) -> Option<&str> {
        self.uri.split_once('#').map(|(_, member)| member)
    }

    /// This name with the member fragment stripped.
    pub fn without_member(&self) -> Self {
        match self.uri.split_once('#') {
            Some((base, _)) => Self {
                uri: base.to_owned(),
            },
            None => self.clone(),
        }
    }

    /// The parent name, one path segment up. `fabric:/a/b` → `fabric:/a`;
    /// a top-level name has no parent.
    pub fn parent(&self) -> Option<Self> {
        let base = match self.uri.split_once('#') {
            Some((base, _)) => base,
            None => self.uri.as_str(),
        };
        let path = &base[SCHEME.len()..];
        let (parent_path, _) = path.rsplit_once('/')?;
        Some(Self {
            uri: format!("{}{}", SCHEME, parent_path),
        })
    }
}

impl FromStr for ServiceName {
    type Err = ErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix(SCHEME).ok_or(ErrorKind::InvalidNameUri)?;
        let path = rest.split('#').next().unwrap_or_default();
        if path.is_empty() || path.starts_with('/') || path.ends_with('/') {
            return Err(ErrorKind::InvalidNameUri);
        }
        if rest.matches('#').count() > 1 {
            return Err(ErrorKind::InvalidNameUri);
        }
        Ok(Self { uri: s.to_owned() })
    }
}

impl Display for ServiceName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        let name: ServiceName = "fabric:/app/svc".parse().unwrap();
        assert_eq!(name.as_str(), "fabric:/app/svc");
        assert_eq!(name.member(), None);
        assert_eq!(name.without_member(), name);
    }

    #[test]
    fn parse_member() {
        let name: ServiceName = "fabric:/app/group#member".parse().unwrap();
        assert_eq!(name.member(), Some("member"));
        assert_eq!(name.without_member().as_str(), "fabric:/app/group");
    }

    #[test]
    fn parse_rejects_bad_uris() {
        for bad in [
            "http://x",
            "fabric:/",
            "fabric://x",
            "fabric:/x/",
            "app/svc",
            "fabric:/a#b#c",
        ] {
            assert_eq!(bad.parse::<ServiceName>(), Err(ErrorKind::InvalidNameUri), "{bad}");
        }
    }

    #[test]
    fn parent_chain() {
        let name: ServiceName = "fabric:/a/b/c".parse().unwrap();
        let parent = name.parent().unwrap();
        assert_eq!(parent.as_str(), "fabric:/a/b");
        let grandparent = parent.parent().unwrap();
        assert_eq!(grandparent.as_str(), "fabric:/a");
        assert_eq!(grandparent.parent(), None);
    }

    #[test]
    fn parent_ignores_member() {
        let name: ServiceName = "fabric:/a/b#m".parse().unwrap();
        assert_eq!(name.parent().unwrap().as_str(), "fabric:/a");
    }
}
