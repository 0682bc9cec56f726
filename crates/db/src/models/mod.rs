pub mod category;
pub mod contributor;
pub mod filters;
pub mod project;
pub mod task;
pub mod task_run;
pub mod tutorial_view;
pub mod user;

#[cfg(test)]
pub(crate) mod test_support {
    use serde_json::json;
    use sqlx::SqlitePool;

    use super::{
        project::{CreateProject, Project},
        user::{CreateUser, User},
    };

    pub async fn user(pool: &SqlitePool, name: &str) -> User {
        User::create(
            pool,
            &CreateUser {
                name: name.to_string(),
                fullname: name.to_uppercase(),
                email_addr: format!("{name}@example.com"),
                passwd_hash: Some("hash".to_string()),
                info: None,
            },
        )
        .await
        .unwrap()
    }

    pub fn create_project(owner_id: i64, short_name: &str) -> CreateProject {
        CreateProject {
            name: format!("{short_name} project"),
            short_name: short_name.to_string(),
            description: "description".to_string(),
            long_description: "long description".to_string(),
            owner_id,
            category_id: None,
            hidden: false,
            info: json!({}),
        }
    }

    pub async fn project(pool: &SqlitePool, owner_id: i64, short_name: &str) -> Project {
        Project::create(pool, &create_project(owner_id, short_name))
            .await
            .unwrap()
    }
}
