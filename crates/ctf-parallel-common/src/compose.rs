//! Compose Rewriter: produce an attempt-private copy of a challenge's compose
//! manifest with unique service/container names, a unique bridge network, and port
//! bindings drawn from the Port Allocator.
//!
//! Manifests are walked as untyped `serde_yaml::Value` rather than a typed struct because
//! compose files carry vendor extensions (`x-*`, `profiles`, `depends_on` shapes, …) this
//! component must pass through unexamined.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::error::ComposeError;
use crate::ports::PortAllocator;

const SHARED_NETWORK: &str = "ctfnet";

pub type PortMap = HashMap<u16, u16>;

/// `rewrite(source, target, suffix, net_name, port_map, allocator)`. `port_map` is
/// consulted for already-known internal→external mappings and updated in place with any
/// freshly allocated ones; the same map, returned, is the effective internal→external
/// binding set for the rewritten compose file.
pub fn rewrite(
    source: &Path,
    target: &Path,
    suffix: &str,
    net_name: &str,
    port_map: &mut PortMap,
    allocator: &PortAllocator,
) -> Result<(), ComposeError> {
    let text = std::fs::read_to_string(source)?;
    let mut doc: Value = serde_yaml::from_str(&text)?;

    let root = doc.as_mapping_mut().ok_or(ComposeError::NotAMapping)?;

    if let Some(services) = root
        .get_mut(Value::from("services"))
        .and_then(Value::as_mapping_mut)
    {
        let original: Vec<(Value, Value)> = services.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        services.clear();
        for (name_value, mut service) in original {
            let name = name_value
                .as_str()
                .ok_or_else(|| ComposeError::MalformedPortSpec("non-string service name".into()))?
                .to_string();
            let suffixed_name = suffix_once(&name, suffix);

            if let Some(service_map) = service.as_mapping_mut() {
                if service_map.contains_key(Value::from("container_name")) {
                    if let Some(Value::String(cn)) = service_map.get(Value::from("container_name")) {
                        let new_cn = suffix_once(cn, suffix);
                        service_map.insert(Value::from("container_name"), Value::from(new_cn));
                    }
                }

                let ports_declared = service_map
                    .get(Value::from("ports"))
                    .and_then(Value::as_sequence)
                    .is_some();

                if ports_declared {
                    let ports = service_map
                        .get_mut(Value::from("ports"))
                        .and_then(Value::as_sequence_mut)
                        .expect("checked above");
                    for entry in ports.iter_mut() {
                        rewrite_port_entry(entry, port_map, allocator)?;
                    }
                } else if !port_map.is_empty() {
                    let mut seq = Vec::new();
                    for (&internal, &external) in port_map.iter() {
                        seq.push(Value::from(format!("{external}:{internal}")));
                    }
                    service_map.insert(Value::from("ports"), Value::Sequence(seq));
                }

                if let Some(networks) = service_map.get_mut(Value::from("networks")) {
                    rewrite_networks_reference(networks, net_name);
                }
            }

            services.insert(Value::from(suffixed_name), service);
        }
    }

    redeclare_top_level_networks(root, net_name);

    let rewritten = serde_yaml::to_string(&doc)?;
    std::fs::write(target, rewritten)?;
    Ok(())
}

fn suffix_once(name: &str, suffix: &str) -> String {
    let tail = format!("-{suffix}");
    if name.ends_with(&tail) {
        name.to_string()
    } else {
        format!("{name}{tail}")
    }
}

fn rewrite_port_entry(
    entry: &mut Value,
    port_map: &mut PortMap,
    allocator: &PortAllocator,
) -> Result<(), ComposeError> {
    let internal = parse_internal_port(entry)?;
    let external = match port_map.get(&internal) {
        Some(&e) => e,
        None => {
            let e = allocator
                .allocate_one()
                .map_err(|_| ComposeError::MalformedPortSpec(format!("no free port for internal {internal}")))?;
            port_map.insert(internal, e);
            e
        }
    };
    *entry = Value::from(format!("{external}:{internal}"));
    Ok(())
}

fn parse_internal_port(entry: &Value) -> Result<u16, ComposeError> {
    match entry {
        Value::Number(n) => n
            .as_u64()
            .and_then(|v| u16::try_from(v).ok())
            .ok_or_else(|| ComposeError::MalformedPortSpec(format!("{n}"))),
        Value::String(s) => {
            let internal = s.rsplit(':').next().unwrap_or(s);
            internal
                .parse::<u16>()
                .map_err(|_| ComposeError::MalformedPortSpec(s.clone()))
        }
        other => Err(ComposeError::MalformedPortSpec(format!("{other:?}"))),
    }
}

fn rewrite_networks_reference(networks: &mut Value, net_name: &str) {
    match networks {
        Value::Sequence(seq) => {
            for item in seq.iter_mut() {
                if item.as_str() == Some(SHARED_NETWORK) {
                    *item = Value::from(net_name);
                }
            }
        }
        Value::Mapping(map) => {
            if let Some(v) = map.remove(Value::from(SHARED_NETWORK)) {
                map.insert(Value::from(net_name), v);
            }
        }
        _ => {}
    }
}

fn redeclare_top_level_networks(root: &mut Mapping, net_name: &str) {
    let mut networks = root
        .remove(Value::from("networks"))
        .and_then(|v| v.as_mapping().cloned())
        .unwrap_or_default();
    networks.remove(Value::from(SHARED_NETWORK));

    let mut decl = Mapping::new();
    decl.insert(Value::from("driver"), Value::from("bridge"));
    decl.insert(Value::from("name"), Value::from(net_name));
    networks.insert(Value::from(net_name), Value::Mapping(decl));

    root.insert(Value::from("networks"), Value::Mapping(networks));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortRange;

    fn write_fixture(dir: &std::path::Path, contents: &str) -> PathBuf {
        let path = dir.join("docker-compose.yml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn rewrites_service_names_ports_and_networks() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_fixture(
            dir.path(),
            r#"
services:
  chall:
    image: example/chall
    container_name: chall
    ports:
      - "80"
    networks:
      - ctfnet
networks:
  ctfnet:
    external: true
"#,
        );
        let target = dir.path().join("docker-compose-rewritten.yml");
        let mut port_map = PortMap::new();
        let allocator = PortAllocator::new(PortRange {
            start: 43000,
            end: 43100,
        });

        rewrite(&source, &target, "abc123", "ctfnet-abc123", &mut port_map, &allocator).unwrap();

        let out: Value = serde_yaml::from_str(&std::fs::read_to_string(&target).unwrap()).unwrap();
        let services = out.get("services").unwrap().as_mapping().unwrap();
        assert!(services.contains_key(Value::from("chall-abc123")));
        let svc = services.get(Value::from("chall-abc123")).unwrap();
        assert_eq!(
            svc.get("container_name").unwrap().as_str().unwrap(),
            "chall-abc123"
        );
        let external = port_map.get(&80).copied().unwrap();
        assert!((43000..=43100).contains(&external));
        let ports = svc.get("ports").unwrap().as_sequence().unwrap();
        assert_eq!(ports[0].as_str().unwrap(), format!("{external}:80"));

        let net_refs = svc.get("networks").unwrap().as_sequence().unwrap();
        assert_eq!(net_refs[0].as_str().unwrap(), "ctfnet-abc123");

        let top_networks = out.get("networks").unwrap().as_mapping().unwrap();
        assert!(!top_networks.contains_key(Value::from("ctfnet")));
        assert!(top_networks.contains_key(Value::from("ctfnet-abc123")));
    }

    #[test]
    fn injects_binding_when_service_declares_no_ports() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_fixture(
            dir.path(),
            r#"
services:
  chall:
    image: example/chall
"#,
        );
        let target = dir.path().join("out.yml");
        let mut port_map = PortMap::new();
        port_map.insert(9999, 15000);
        let allocator = PortAllocator::new(PortRange {
            start: 44000,
            end: 44100,
        });

        rewrite(&source, &target, "sfx", "ctfnet-sfx", &mut port_map, &allocator).unwrap();

        let out: Value = serde_yaml::from_str(&std::fs::read_to_string(&target).unwrap()).unwrap();
        let services = out.get("services").unwrap().as_mapping().unwrap();
        let svc = services.get(Value::from("chall-sfx")).unwrap();
        let ports = svc.get("ports").unwrap().as_sequence().unwrap();
        assert_eq!(ports[0].as_str().unwrap(), "15000:9999");
    }

    #[test]
    fn injects_binding_per_service_not_just_the_first() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_fixture(
            dir.path(),
            r#"
services:
  chall:
    image: example/chall
    ports:
      - "8080:80"
  sidecar:
    image: example/sidecar
"#,
        );
        let target = dir.path().join("out.yml");
        let mut port_map = PortMap::new();
        port_map.insert(9999, 15000);
        let allocator = PortAllocator::new(PortRange {
            start: 46000,
            end: 46100,
        });

        rewrite(&source, &target, "sfx", "ctfnet-sfx", &mut port_map, &allocator).unwrap();

        let out: Value = serde_yaml::from_str(&std::fs::read_to_string(&target).unwrap()).unwrap();
        let services = out.get("services").unwrap().as_mapping().unwrap();

        let sidecar = services.get(Value::from("sidecar-sfx")).unwrap();
        let sidecar_ports = sidecar.get("ports").unwrap().as_sequence().unwrap();
        assert_eq!(sidecar_ports[0].as_str().unwrap(), "15000:9999");

        let chall = services.get(Value::from("chall-sfx")).unwrap();
        let chall_ports = chall.get("ports").unwrap().as_sequence().unwrap();
        let allocated = port_map.get(&80).copied().unwrap();
        assert!((46000..=46100).contains(&allocated));
        assert_eq!(chall_ports[0].as_str().unwrap(), format!("{allocated}:80"));
    }

    #[test]
    fn rewrite_is_idempotent_on_repeated_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_fixture(
            dir.path(),
            r#"
services:
  chall:
    image: example/chall
    ports:
      - "8080:80"
"#,
        );
        let allocator = PortAllocator::new(PortRange {
            start: 45000,
            end: 45100,
        });
        let target1 = dir.path().join("out1.yml");
        let mut port_map = PortMap::new();
        rewrite(&source, &target1, "xyz", "ctfnet-xyz", &mut port_map, &allocator).unwrap();

        let target2 = dir.path().join("out2.yml");
        rewrite(&target1, &target2, "xyz", "ctfnet-xyz", &mut port_map, &allocator).unwrap();

        let a: Value = serde_yaml::from_str(&std::fs::read_to_string(&target1).unwrap()).unwrap();
        let b: Value = serde_yaml::from_str(&std::fs::read_to_string(&target2).unwrap()).unwrap();
        assert_eq!(a, b);
    }
}
