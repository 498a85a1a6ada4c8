//! A value for every `QueryType`.

use cinder_core::QueryType;
use serde::{Deserialize, Serialize};

/// One explicit field per query type, so tables stay exhaustive and
/// immutable after load.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerQueryType<T> {
    pub chat: T,
    pub code: T,
    pub recall: T,
    pub reasoning: T,
    pub roleplay: T,
    pub project: T,
}

impl<T: Copy> PerQueryType<T> {
    pub fn uniform(value: T) -> Self {
        Self {
            chat: value,
            code: value,
            recall: value,
            reasoning: value,
            roleplay: value,
            project: value,
        }
    }

    pub fn get(&self, query_type: QueryType) -> T {
        match query_type {
            QueryType::Chat => self.chat,
            QueryType::Code => self.code,
            QueryType::Recall => self.recall,
            QueryType::Reasoning => self.reasoning,
            QueryType::Roleplay => self.roleplay,
            QueryType::Project => self.project,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (QueryType, T)> + '_ {
        QueryType::ALL.into_iter().map(|t| (t, self.get(t)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_covers_every_type() {
        let table = PerQueryType {
            chat: 1,
            code: 2,
            recall: 3,
            reasoning: 4,
            roleplay: 5,
            project: 6,
        };
        let values: Vec<i32> = table.iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(table.get(QueryType::Roleplay), 5);
    }
}
