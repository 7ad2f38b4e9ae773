//! Container names that carry their manifest identity
//!
//! A managed container is named `{container}--{manifest}--{suffix}`. Both
//! components are escaped so they never contain `--`: `_` becomes `___`
//! and then `-` becomes `_-_`. The random hex suffix keeps names unique
//! across restarts.

const SEPARATOR: &str = "--";

/// The (manifest, container) pair a runtime container belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerIdentity {
    pub manifest_id: String,
    pub container_name: String,
}

fn escape(s: &str) -> String {
    s.replace('_', "___").replace('-', "_-_")
}

fn unescape(s: &str) -> String {
    s.replace("_-_", "-").replace("___", "_")
}

/// Fresh runtime name for `container_name` of `manifest_id`
pub fn build_container_name(manifest_id: &str, container_name: &str) -> String {
    format!(
        "{}{}{}{}{:x}",
        escape(container_name),
        SEPARATOR,
        escape(manifest_id),
        SEPARATOR,
        rand::random::<u32>()
    )
}

/// Decode a runtime name. Names not built by [`build_container_name`] come
/// back with an empty manifest id and the whole name as the container.
pub fn parse_container_name(name: &str) -> ContainerIdentity {
    let name = name.strip_prefix('/').unwrap_or(name);
    let mut parts = name.split(SEPARATOR);
    let container_name = unescape(parts.next().unwrap_or_default());
    let manifest_id = parts.next().map(unescape).unwrap_or_default();
    ContainerIdentity {
        manifest_id,
        container_name,
    }
}
