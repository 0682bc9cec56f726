use db::models::{category::Category, project::Project, task::Task, task_run::TaskRun};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Project,
    Task,
    TaskRun,
    Category,
}

impl ResourceKind {
    /// Lower-case name used both as link title and as API path segment.
    pub fn title(self) -> &'static str {
        match self {
            ResourceKind::Project => "project",
            ResourceKind::Task => "task",
            ResourceKind::TaskRun => "taskrun",
            ResourceKind::Category => "category",
        }
    }
}

/// Something exposed by the REST API that can point at itself and its parents.
pub trait ApiResource {
    const KIND: ResourceKind;

    fn resource_id(&self) -> i64;

    fn parents(&self) -> Vec<(ResourceKind, i64)> {
        Vec::new()
    }
}

impl ApiResource for Project {
    const KIND: ResourceKind = ResourceKind::Project;

    fn resource_id(&self) -> i64 {
        self.id
    }
}

impl ApiResource for Task {
    const KIND: ResourceKind = ResourceKind::Task;

    fn resource_id(&self) -> i64 {
        self.id
    }

    fn parents(&self) -> Vec<(ResourceKind, i64)> {
        vec![(ResourceKind::Project, self.project_id)]
    }
}

impl ApiResource for TaskRun {
    const KIND: ResourceKind = ResourceKind::TaskRun;

    fn resource_id(&self) -> i64 {
        self.id
    }

    fn parents(&self) -> Vec<(ResourceKind, i64)> {
        vec![
            (ResourceKind::Project, self.project_id),
            (ResourceKind::Task, self.task_id),
        ]
    }
}

impl ApiResource for Category {
    const KIND: ResourceKind = ResourceKind::Category;

    fn resource_id(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Links {
    pub link: String,
    pub links: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct Hateoas {
    base_url: String,
}

impl Hateoas {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn link(&self, rel: &str, title: &str, href: &str) -> String {
        format!("<link rel='{rel}' title='{title}' href='{href}'/>")
    }

    pub fn create_link(&self, kind: ResourceKind, id: i64, rel: &str) -> String {
        let title = kind.title();
        let href = format!("{}/api/{title}/{id}", self.base_url);
        self.link(rel, title, &href)
    }

    /// Self link plus parent links. Projects carry only the self link, and
    /// kinds outside the task hierarchy get nothing.
    pub fn create_links<R: ApiResource>(&self, item: &R) -> Option<Links> {
        let link = self.create_link(R::KIND, item.resource_id(), "self");
        match R::KIND {
            ResourceKind::TaskRun | ResourceKind::Task => Some(Links {
                link,
                links: Some(
                    item.parents()
                        .into_iter()
                        .map(|(kind, id)| self.create_link(kind, id, "parent"))
                        .collect(),
                ),
            }),
            ResourceKind::Project => Some(Links { link, links: None }),
            ResourceKind::Category => None,
        }
    }

    /// JSON rendering of `item` with its `link`/`links` keys added.
    pub fn with_links<R: ApiResource + Serialize>(
        &self,
        item: &R,
    ) -> Result<Value, serde_json::Error> {
        let mut value = serde_json::to_value(item)?;
        if let (Some(links), Value::Object(map)) = (self.create_links(item), &mut value) {
            map.insert("link".to_string(), Value::String(links.link));
            if let Some(parents) = links.links {
                map.insert(
                    "links".to_string(),
                    Value::Array(parents.into_iter().map(Value::String).collect()),
                );
            }
        }
        Ok(value)
    }
}

/// Drops client-supplied `link`/`links` keys before an update is applied.
pub fn remove_links(mut item: Value) -> Value {
    if let Value::Object(map) = &mut item {
        map.remove("link");
        map.remove("links");
    }
    item
}
