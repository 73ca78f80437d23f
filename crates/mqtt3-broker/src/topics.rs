//! The broker's topic list and its retained messages.
//!
//! Owned by the hub and shared with sessions; there is at most one entry
//! per topic name, created the first time a retain-flagged publish targets
//! it.

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use mqtt3_protocol::{TopicFilter, TopicName};

/// The most recent retain-flagged publish on a topic.
#[derive(Debug, Clone)]
pub struct RetainedMessage {
    pub payload: Bytes,
    pub qos: u8,
}

#[derive(Debug)]
struct Topic {
    name: TopicName,
    retained: Option<RetainedMessage>,
}

pub struct TopicStore {
    strict_matching: bool,
    topics: Mutex<Vec<Topic>>,
}

impl TopicStore {
    pub fn new(strict_matching: bool) -> Self {
        TopicStore {
            strict_matching,
            topics: Mutex::new(Vec::new()),
        }
    }

    /// Records `payload` as the retained message of `name`, creating the
    /// topic on first use. An empty payload clears the retained message.
    pub fn retain(&self, name: &TopicName, payload: &Bytes, qos: u8) {
        let retained = if payload.is_empty() {
            debug!(topic = %name, "clearing retained message");
            None
        } else {
            debug!(topic = %name, qos, len = payload.len(), "storing retained message");
            Some(RetainedMessage {
                payload: payload.clone(),
                qos,
            })
        };

        let mut topics = self.topics.lock();
        if let Some(topic) = topics.iter_mut().find(|t| t.name == *name) {
            topic.retained = retained;
        } else {
            topics.push(Topic {
                name: name.clone(),
                retained,
            });
        }
    }

    /// Clones of every retained message on a topic matching `filter`.
    pub fn retained_matching(&self, filter: &TopicFilter) -> Vec<(TopicName, RetainedMessage)> {
        let topics = self.topics.lock();
        topics
            .iter()
            .filter(|topic| self.matches(filter, &topic.name))
            .filter_map(|topic| {
                topic
                    .retained
                    .clone()
                    .map(|retained| (topic.name.clone(), retained))
            })
            .collect()
    }

    pub fn retained_count(&self) -> usize {
        self.topics
            .lock()
            .iter()
            .filter(|topic| topic.retained.is_some())
            .count()
    }

    fn matches(&self, filter: &TopicFilter, name: &TopicName) -> bool {
        if self.strict_matching {
            filter.matches_strict(name)
        } else {
            filter.matches(name)
        }
    }
}
