//! Manifest builders for the Kyma resources the preparation creates
//!
//! Pure functions returning `serde_json::Value` specs; the cluster-facing
//! modules wrap them into DynamicObjects and apply them.

use serde_json::{json, Value};

/// APIRule API version
pub const APIRULE_API_VERSION: &str = "gateway.kyma-project.io/v1beta1";
/// APIRule kind
pub const APIRULE_KIND: &str = "APIRule";
/// VirtualService API version
pub const VIRTUAL_SERVICE_API_VERSION: &str = "networking.istio.io/v1beta1";
/// VirtualService kind
pub const VIRTUAL_SERVICE_KIND: &str = "VirtualService";
/// Serverless Function API version
pub const FUNCTION_API_VERSION: &str = "serverless.kyma-project.io/v1alpha2";
/// Serverless Function kind
pub const FUNCTION_KIND: &str = "Function";
/// Subscription kind (both versions)
pub const SUBSCRIPTION_KIND: &str = "Subscription";
/// Gateway every test APIRule is attached to
pub const KYMA_GATEWAY: &str = "kyma-system/kyma-gateway";
/// Label the APIRule controller puts on the VirtualService it generates
pub const APIRULE_VS_LABEL: &str = "apirule.gateway.kyma-project.io/v1beta1";

/// Event type prefix used by the eventing test suite
pub const EVENT_TYPE_PREFIX: &str = "sap.kyma.custom";

/// Events the sink function subscribes to, as (event name, version)
pub const SINK_EVENTS: &[(&str, &str)] = &[
    ("order.created", "v1"),
    ("order.received", "v1"),
    ("order.updated", "v1"),
];

/// Label selector matching the VirtualService generated for an APIRule
pub fn apirule_vs_selector(name: &str, namespace: &str) -> String {
    format!("{}={}.{}", APIRULE_VS_LABEL, name, namespace)
}

/// APIRule spec exposing `service:port` under a short host named after the rule
pub fn apirule_spec(name: &str, service: &str, port: u16) -> Value {
    json!({
        "gateway": KYMA_GATEWAY,
        "host": name,
        "service": {
            "name": service,
            "port": port,
        },
        "rules": [{
            "path": "/.*",
            "methods": ["GET", "POST", "PUT", "DELETE"],
            "accessStrategies": [{ "handler": "allow" }],
        }],
    })
}

/// Inline source of the eventing-sink function
///
/// Stores the CloudEvents it receives and answers `GET /` with 200 so the
/// reachability check can probe it.
pub const SINK_FUNCTION_SOURCE: &str = r#"const received = [];
module.exports = {
  main: function (event, context) {
    if (event.extensions.request.method === "GET") {
      return { status: "ok", received: received.length };
    }
    received.push({ type: event["ce-type"], source: event["ce-source"], data: event.data });
    return "";
  }
};
"#;

/// Function spec for the eventing-sink
pub fn sink_function_spec() -> Value {
    json!({
        "runtime": "nodejs20",
        "replicas": 1,
        "source": {
            "inline": {
                "source": SINK_FUNCTION_SOURCE,
                "dependencies": "{ \"name\": \"eventing-sink\", \"version\": \"1.0.0\" }",
            }
        },
    })
}

/// Cluster-local URL of a function's service
pub fn sink_url(name: &str, namespace: &str) -> String {
    format!("http://{}.{}.svc.cluster.local", name, namespace)
}

/// Full event type for an application event
pub fn event_type(app: &str, event: &str, version: &str) -> String {
    format!("{}.{}.{}.{}", EVENT_TYPE_PREFIX, app, event, version)
}

/// v1alpha1 Subscription spec with the BEB-style filter
pub fn subscription_v1alpha1_spec(sink: &str, source: &str, event_type: &str) -> Value {
    json!({
        "sink": sink,
        "filter": {
            "filters": [{
                "eventSource": { "property": "source", "type": "exact", "value": source },
                "eventType": { "property": "type", "type": "exact", "value": event_type },
            }]
        },
    })
}

/// v1alpha2 Subscription spec
pub fn subscription_v1alpha2_spec(sink: &str, source: &str, event_type: &str) -> Value {
    json!({
        "sink": sink,
        "source": source,
        "types": [event_type],
        "typeMatching": "standard",
    })
}

/// Mock application Deployment manifest
pub fn mock_deployment(name: &str, namespace: &str, image: &str, env: &[(&str, &str)]) -> Value {
    let env: Vec<Value> = env
        .iter()
        .map(|(k, v)| json!({ "name": k, "value": v }))
        .collect();
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": { "app": name },
        },
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": { "app": name } },
            "template": {
                "metadata": { "labels": { "app": name } },
                "spec": {
                    "containers": [{
                        "name": "mock",
                        "image": image,
                        "ports": [{ "containerPort": 10000 }],
                        "env": env,
                    }]
                }
            }
        },
    })
}

/// Mock application Service manifest
pub fn mock_service(name: &str, namespace: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": { "app": name },
        },
        "spec": {
            "selector": { "app": name },
            "ports": [{ "name": "http", "port": 10000, "targetPort": 10000 }],
        },
    })
}
