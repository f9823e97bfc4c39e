//! Event archiving and entity resolution.

mod archiver;

pub use archiver::*;

use crate::db::Event;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResolveError {
    #[error("event has no component")]
    MissingComponent,
    #[error("resource event has no resource")]
    MissingResource,
}

/// Maps an event to the id of the entity it reports on.
pub trait EntityResolver: Send + Sync {
    fn entity_id(&self, event: &Event) -> Result<String, ResolveError>;
}

/// Resolves `/{source_type}/{connector}/{connector_name}/{component}[/{resource}]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathResolver;

impl EntityResolver for PathResolver {
    fn entity_id(&self, event: &Event) -> Result<String, ResolveError> {
        if event.component.is_empty() {
            return Err(ResolveError::MissingComponent);
        }

        let mut id = format!(
            "/{}/{}/{}/{}",
            event.source_type, event.connector, event.connector_name, event.component
        );

        match event.resource.as_deref() {
            Some(resource) if !resource.is_empty() => {
                id.push('/');
                id.push_str(resource);
            }
            _ if event.source_type == "resource" => return Err(ResolveError::MissingResource),
            _ => {}
        }

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(source_type: &str, resource: Option<&str>) -> Event {
        Event {
            connector: "nagios".to_string(),
            connector_name: "n1".to_string(),
            source_type: source_type.to_string(),
            component: "web01".to_string(),
            resource: resource.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_path_resolver() {
        let resolver = PathResolver;
        assert_eq!(
            resolver.entity_id(&event("resource", Some("http"))),
            Ok("/resource/nagios/n1/web01/http".to_string())
        );
        assert_eq!(
            resolver.entity_id(&event("component", None)),
            Ok("/component/nagios/n1/web01".to_string())
        );
        assert_eq!(
            resolver.entity_id(&event("resource", None)),
            Err(ResolveError::MissingResource)
        );

        let mut anonymous = event("component", None);
        anonymous.component.clear();
        assert_eq!(resolver.entity_id(&anonymous), Err(ResolveError::MissingComponent));
    }
}
