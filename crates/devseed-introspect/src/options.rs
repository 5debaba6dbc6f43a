/// Options that control which tables become entities.
#[derive(Debug, Clone, Default)]
pub struct IntrospectOptions {
    pub include_system_schemas: bool,
    /// Restrict introspection to these schemas.
    pub schemas: Option<Vec<String>>,
    /// Tables (as `schema.table`) never turned into entities, such as the
    /// migration history table.
    pub exclude: Vec<String>,
}

impl IntrospectOptions {
    pub fn excluding(mut self, label: impl Into<String>) -> Self {
        self.exclude.push(label.into());
        self
    }
}
