//! Publish Pipelines: one "dirty → encode → publish → clear" processor per
//! feature, run by the session controller in a fixed order every iteration:
//! config, status, data, resources, then a resource-engine tick.

use crate::codec::{encode_cfg_reply, encode_data_publish, encode_named_collection, encode_resource_table};
use crate::registry::AttachmentRegistry;
use crate::resource::ResourceEngine;
use crate::topics::{TOPIC_CFG, TOPIC_DATA, TOPIC_INFO, TOPIC_RSC};
use crate::transport::{HttpResource, MqttTransport};

/// One-shot "publish regardless of dirty" triggers, set by the controller
/// right after a successful connect (status forced, resources forced,
/// config first) and cleared here once fully flushed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForceFlags {
    pub status: bool,
    pub data: bool,
    pub resources: bool,
    pub config: bool,
}

/// Run one pass of all five pipeline steps in spec order.
pub fn run_cycle(
    registry: &AttachmentRegistry,
    engine: &mut ResourceEngine,
    transport: &mut dyn MqttTransport,
    http: &mut dyn HttpResource,
    force: &mut ForceFlags,
) {
    run_config(registry, transport, &mut force.config);
    if run_status(registry, transport, force.status) {
        force.status = false;
    }
    if run_data(registry, transport, force.data) {
        force.data = false;
    }
    if run_resources(registry, transport, force.resources) {
        force.resources = false;
    }
    engine.process_get(&registry.resources, http);
}

/// Handle the `dev/cfg` pipeline: a pending parameter-update reply takes
/// priority over the forced first-connect full dump. The pending record is
/// only removed from `params.pending` once the publish actually succeeds —
/// on failure it is put back so the next iteration retries the same
/// `{cid, accepted}` reply instead of falling back to a bare full dump.
fn run_config(registry: &AttachmentRegistry, transport: &mut dyn MqttTransport, force_full_dump: &mut bool) {
    let Some(params) = registry.params.as_ref() else {
        return;
    };
    let pending = params.pending.lock().unwrap().clone();
    let has_pending = pending.is_some();
    if !has_pending && !params.is_dirty() && !*force_full_dump {
        return;
    }
    let payload = match &pending {
        Some(update) if !update.accepted.is_empty() => {
            let mut subset = crate::named::NamedCollection::new();
            for name in &update.accepted {
                if let Some(v) = params.collection.get(name) {
                    subset.push(v.clone());
                }
            }
            encode_cfg_reply(update.cid, &subset)
        }
        Some(update) => encode_cfg_reply(update.cid, &params.collection),
        None => encode_cfg_reply(0, &params.collection),
    };
    match payload {
        Ok(body) => match transport.publish(TOPIC_CFG, body.as_bytes()) {
            Ok(()) => {
                // Only now is the pending record consumed: the publish
                // that acknowledges it actually reached the transport.
                *params.pending.lock().unwrap() = None;
                params.clear_dirty();
                *force_full_dump = false;
                log::debug!("published dev/cfg ({} bytes)", body.len());
            }
            Err(e) => {
                // Leave the pending record in place (it was only cloned
                // above, never taken) so the next iteration retries the
                // same {cid, accepted} reply rather than losing it.
                log::warn!("publish dev/cfg failed: {e}");
            }
        },
        Err(e) => log::error!("encode dev/cfg failed: {e}"),
    }
}

/// Returns `true` if every attached status set ended up clean.
fn run_status(registry: &AttachmentRegistry, transport: &mut dyn MqttTransport, force_all: bool) -> bool {
    let mut all_clean = true;
    for (_, set) in registry.iter_status() {
        if !(force_all || set.is_dirty()) {
            continue;
        }
        match encode_named_collection(&set.collection) {
            Ok(body) => match transport.publish(TOPIC_INFO, body.as_bytes()) {
                Ok(()) => {
                    set.clear_dirty();
                    log::debug!("published dev/info ({} bytes)", body.len());
                }
                Err(e) => {
                    log::warn!("publish dev/info failed: {e}");
                    all_clean = false;
                }
            },
            Err(e) => {
                log::error!("encode dev/info failed: {e}");
                all_clean = false;
            }
        }
    }
    all_clean
}

/// Returns `true` if every attached data stream ended up clean.
fn run_data(registry: &AttachmentRegistry, transport: &mut dyn MqttTransport, force_all: bool) -> bool {
    let mut all_clean = true;
    for (_, stream) in registry.iter_data() {
        if !(force_all || stream.is_dirty()) {
            continue;
        }
        match encode_data_publish(stream) {
            Ok(body) => match transport.publish(TOPIC_DATA, body.as_bytes()) {
                Ok(()) => {
                    stream.clear_dirty();
                    log::debug!("published dev/data ({} bytes)", body.len());
                }
                Err(e) => {
                    log::warn!("publish dev/data failed: {e}");
                    all_clean = false;
                }
            },
            Err(e) => {
                log::error!("encode dev/data failed: {e}");
                all_clean = false;
            }
        }
    }
    all_clean
}

fn run_resources(registry: &AttachmentRegistry, transport: &mut dyn MqttTransport, force_all: bool) -> bool {
    let resources = &registry.resources;
    if !(force_all || resources.is_dirty()) {
        return true;
    }
    let entries: Vec<_> = resources.iter().map(|d| (d.name.clone(), d.version())).collect();
    match encode_resource_table(&entries) {
        Ok(body) => match transport.publish(TOPIC_RSC, body.as_bytes()) {
            Ok(()) => {
                resources.clear_dirty();
                log::debug!("published dev/rsc ({} bytes)", body.len());
                true
            }
            Err(e) => {
                log::warn!("publish dev/rsc failed: {e}");
                false
            }
        },
        Err(e) => {
            log::error!("encode dev/rsc failed: {e}");
            false
        }
    }
}
