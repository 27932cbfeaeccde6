//! Domain / subdomain / topic hierarchy. Pass-through metadata only.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub subdomains: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subdomain {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub indicators: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxonomy {
    #[serde(default)]
    pub domains: Vec<Domain>,
    #[serde(default)]
    pub subdomains: Vec<Subdomain>,
    #[serde(default)]
    pub topics: Vec<Topic>,
}

impl Taxonomy {
    /// Nested listing; dangling references are left out.
    pub fn tree(&self) -> Value {
        let topic = |slug: &String| {
            self.topics.iter().find(|topic| &topic.slug == slug).map(|topic| {
                json!({
                    "slug": topic.slug,
                    "name": topic.name,
                    "indicators": topic.indicators,
                })
            })
        };
        let subdomain = |slug: &String| {
            self.subdomains
                .iter()
                .find(|subdomain| &subdomain.slug == slug)
                .map(|subdomain| {
                    json!({
                        "slug": subdomain.slug,
                        "name": subdomain.name,
                        "topics": subdomain.topics.iter().filter_map(topic).collect::<Vec<_>>(),
                    })
                })
        };

        Value::Array(
            self.domains
                .iter()
                .map(|domain| {
                    json!({
                        "slug": domain.slug,
                        "name": domain.name,
                        "description": domain.description,
                        "subdomains": domain.subdomains.iter().filter_map(subdomain).collect::<Vec<_>>(),
                    })
                })
                .collect(),
        )
    }

    /// Every indicator slug referenced by a topic.
    pub fn indicator_slugs(&self) -> impl Iterator<Item = &str> {
        self.topics
            .iter()
            .flat_map(|topic| topic.indicators.iter().map(String::as_str))
    }
}
