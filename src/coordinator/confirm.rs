use crate::host::{ChangeNotifier, EntityValue, SensorAccessor};
use std::time::Duration;

fn at_target(current: Option<EntityValue>, target: &EntityValue, tolerance: f64) -> bool {
    current.is_some_and(|v| v.matches(target, tolerance))
}

/// Wait until `entity_id` reports `target`, for at most `timeout`.
///
/// The current state is checked before subscribing and once more right after,
/// so a change landing in between is not missed. The subscription is dropped
/// (and thereby released) on every return path.
pub async fn wait_for_value<H>(
    host: &H,
    entity_id: &str,
    target: &EntityValue,
    timeout: Duration,
    tolerance: f64,
) -> bool
where
    H: SensorAccessor + ChangeNotifier + ?Sized,
{
    if at_target(host.read(entity_id).await, target, tolerance) {
        return true;
    }

    let mut subscription = host.subscribe(entity_id);
    if at_target(host.read(entity_id).await, target, tolerance) {
        return true;
    }

    let matched = async {
        while let Some(value) = subscription.changed().await {
            if value.matches(target, tolerance) {
                return true;
            }
        }
        false
    };
    tokio::time::timeout(timeout, matched).await.unwrap_or(false)
}
