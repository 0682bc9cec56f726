use sqlx::{QueryBuilder, Sqlite};

/// Equality filter on a whitelisted column, as used by the REST list endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub column: &'static str,
    pub value: String,
}

impl FieldFilter {
    /// Keeps only the query parameters that name one of `allowed`.
    pub fn from_params<'a>(
        params: impl IntoIterator<Item = (&'a String, &'a String)>,
        allowed: &[&'static str],
    ) -> Vec<FieldFilter> {
        params
            .into_iter()
            .filter_map(|(key, value)| {
                allowed
                    .iter()
                    .find(|column| **column == key.as_str())
                    .map(|column| FieldFilter {
                        column,
                        value: value.clone(),
                    })
            })
            .collect()
    }
}

/// Appends `AND column = ?` for every filter. The builder must already hold a
/// `WHERE` clause.
pub fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filters: &[FieldFilter]) {
    // Values arrive as strings; SQLite's column affinity converts them for
    // INTEGER and REAL columns.
    for filter in filters {
        qb.push(" AND ")
            .push(filter.column)
            .push(" = ")
            .push_bind(filter.value.clone());
    }
}

/// Identity used to decide which projects a listing may show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer {
    Anonymous,
    User(i64),
    Admin,
}

/// Restricts `project_column` to projects the viewer may see: hidden projects
/// are only visible to their owner and to admins.
pub fn push_visibility(qb: &mut QueryBuilder<'_, Sqlite>, project_column: &str, viewer: Viewer) {
    match viewer {
        Viewer::Admin => {}
        Viewer::Anonymous => {
            qb.push(" AND ")
                .push(project_column)
                .push(" IN (SELECT id FROM projects WHERE hidden = 0)");
        }
        Viewer::User(user_id) => {
            qb.push(" AND ")
                .push(project_column)
                .push(" IN (SELECT id FROM projects WHERE hidden = 0 OR owner_id = ")
                .push_bind(user_id)
                .push(")");
        }
    }
}
