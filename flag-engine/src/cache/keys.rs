/// Builds namespaced far-tier keys and the invalidation channel name.
///
/// Flag keys can't contain `:`, so `flag:{key}` and `overrides:{key}` never
/// collide with each other or with `flags:all`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn flag(&self, flag_key: &str) -> String {
        format!("{}flag:{flag_key}", self.prefix)
    }

    pub fn all_flags(&self) -> String {
        format!("{}flags:all", self.prefix)
    }

    pub fn overrides(&self, flag_key: &str) -> String {
        format!("{}overrides:{flag_key}", self.prefix)
    }

    pub fn channel(&self) -> String {
        format!("{}invalidations", self.prefix)
    }

    /// Every key that holds data derived from `flag_key`.
    pub fn for_flag(&self, flag_key: &str) -> Vec<String> {
        vec![
            self.flag(flag_key),
            self.overrides(flag_key),
            self.all_flags(),
        ]
    }
}
