//! Cross-module scenarios driven through the registry, the manual
//! scheduler, and host-shaped JSON payloads.


use std::rc::Rc;

use serde_json::json;

use marquee_core::{DataManager, ManualScheduler, Value};

use crate::config::DynamicListConfiguration;
use crate::events::Locator;
use crate::registry::DynamicSourceRegistry;

pub(crate) const LIST_ID: &str = "vQdpOESlok";

pub(crate) fn test_config() -> DynamicListConfiguration {
    DynamicListConfiguration::new()
        .cache_chunk_size(5)
        .list_update_buffer_size(5)
        .fetch_retries(2)
        .fetch_timeout_ms(100)
        .cache_expiry_timeout_ms(500)
}

pub(crate) fn setup() -> (Rc<ManualScheduler>, Rc<DataManager>, DynamicSourceRegistry) {
    setup_with(test_config())
}

pub(crate) fn setup_with(
    config: DynamicListConfiguration,
) -> (Rc<ManualScheduler>, Rc<DataManager>, DynamicSourceRegistry) {
    let scheduler = ManualScheduler::new();
    let manager = DataManager::new();
    let registry = DynamicSourceRegistry::new(config, scheduler.clone(), manager.clone());
    (scheduler, manager, registry)
}

/// Values `lo..hi` as a JSON item array.
pub(crate) fn int_items(lo: i64, hi: i64) -> Value {
    Value::Array((lo..hi).map(|i| json!(i)).collect())
}

pub(crate) fn index_metadata(start: i64, min: i64, max: i64, items: Value) -> Value {
    json!({
        "type": "dynamicIndexList",
        "listId": LIST_ID,
        "startIndex": start,
        "minimumInclusiveIndex": min,
        "maximumExclusiveIndex": max,
        "items": items,
    })
}

pub(crate) fn lazy_load(correlation_token: Option<u64>, start: i64, items: Value) -> Value {
    let mut payload = json!({
        "presentationToken": "presentationToken",
        "listId": LIST_ID,
        "startIndex": start,
        "items": items,
    });
    if let Some(token) = correlation_token {
        payload["correlationToken"] = json!(token.to_string());
    }
    payload
}

pub(crate) fn crud(list_version: u64, operations: Value) -> Value {
    json!({
        "presentationToken": "presentationToken",
        "listId": LIST_ID,
        "listVersion": list_version,
        "operations": operations,
    })
}

/// Asserts the next queued fetch request and returns nothing.
pub(crate) fn expect_window_request(
    registry: &DynamicSourceRegistry,
    token: u64,
    start: i64,
    count: i64,
) {
    let event = registry.pop_event().expect("expected a fetch request");
    assert_eq!(event.list_id, LIST_ID);
    assert_eq!(event.correlation_token, token);
    assert_eq!(event.locator, Locator::Window { start, count });
}

pub(crate) fn expect_page_request(registry: &DynamicSourceRegistry, token: u64, page: &str) {
    let event = registry.pop_event().expect("expected a fetch request");
    assert_eq!(event.correlation_token, token);
    assert_eq!(
        event.locator,
        Locator::Page {
            token: page.to_string()
        }
    );
}

/// The LiveArray contents as i64s, for compact assertions.
pub(crate) fn array_values(array: &marquee_core::LiveArrayPtr) -> Vec<i64> {
    array.with_values(|values| values.iter().filter_map(Value::as_i64).collect())
}
