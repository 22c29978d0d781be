//! Template function library.

use std::collections::BTreeMap;

use super::{Data, TemplateError};
use crate::domain::models::{Pod, ANNOTATION_METRIC_TARGET};

/// Name of the Prometheus service deployed alongside experiments.
pub const PROMETHEUS_SERVICE_NAME: &str = "rso-prometheus";

type TemplateFn = fn(&[Data]) -> Result<Data, TemplateError>;

/// Look up a function by name.
pub fn lookup(name: &str) -> Option<TemplateFn> {
    let f: TemplateFn = match name {
        "duration" => duration,
        "percent" => percent,
        "resourceRequests" => resource_requests,
        "promServer" => prom_server,
        "rsoTargetLabel" => rso_target_label,
        "default" => default,
        "quote" => quote,
        "upper" => upper,
        "lower" => lower,
        "trim" => trim,
        "toString" => to_string,
        "index" => index,
        _ => return None,
    };
    Some(f)
}

fn arity(function: &str, args: &[Data], expected: usize) -> Result<(), TemplateError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(TemplateError::invalid_argument(
            function,
            format!("wrong number of args: want {expected}, got {}", args.len()),
        ))
    }
}

/// Seconds between start and completion; zero unless start precedes completion.
fn duration(args: &[Data]) -> Result<Data, TemplateError> {
    arity("duration", args, 2)?;
    let seconds = match (&args[0], &args[1]) {
        (Data::Time(start), Data::Time(end)) if start < end => {
            #[allow(clippy::cast_precision_loss)]
            let millis = (*end - *start).num_milliseconds() as f64;
            millis / 1000.0
        }
        (Data::Time(_) | Data::Null, Data::Time(_) | Data::Null) => 0.0,
        _ => {
            return Err(TemplateError::invalid_argument(
                "duration",
                "arguments must be times",
            ))
        }
    };
    Ok(Data::Float(seconds))
}

/// `floor(value * pct / 100)` as an integer string.
fn percent(args: &[Data]) -> Result<Data, TemplateError> {
    arity("percent", args, 2)?;
    let value = args[0]
        .as_int()
        .ok_or_else(|| TemplateError::invalid_argument("percent", "value must be an integer"))?;
    let pct = args[1]
        .as_int()
        .ok_or_else(|| TemplateError::invalid_argument("percent", "percent must be an integer"))?;
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let result = (value as f64 * (pct as f64 / 100.0)) as i64;
    Ok(Data::Str(result.to_string()))
}

/// Weighted sum of container resource requests in milli-units.
fn resource_requests(args: &[Data]) -> Result<Data, TemplateError> {
    arity("resourceRequests", args, 2)?;
    let pods: &[Pod] = match &args[0] {
        Data::Pods(pods) => pods,
        Data::Null => &[],
        _ => {
            return Err(TemplateError::invalid_argument(
                "resourceRequests",
                "first argument must be a pod list",
            ))
        }
    };
    let Data::Str(weights) = &args[1] else {
        return Err(TemplateError::invalid_argument(
            "resourceRequests",
            "weights must be a string",
        ));
    };

    let mut parsed = Vec::new();
    for entry in weights.split(',') {
        let (name, weight) = entry.split_once('=').unwrap_or((entry, ""));
        let weight: f64 = weight.trim().parse().map_err(|_| {
            TemplateError::invalid_argument(
                "resourceRequests",
                format!("unable to parse weight for {}", name.trim()),
            )
        })?;
        parsed.push((name.trim().to_string(), weight));
    }

    let mut total = 0.0;
    for container in pods.iter().flat_map(|p| &p.containers) {
        for (resource, weight) in &parsed {
            if let Some(quantity) = container.requests.get(resource) {
                #[allow(clippy::cast_precision_loss)]
                let milli = quantity.milli_value() as f64;
                total += weight * milli;
            }
        }
    }
    Ok(Data::Float(total))
}

fn prom_server(args: &[Data]) -> Result<Data, TemplateError> {
    arity("promServer", args, 1)?;
    let namespace = args[0]
        .field("Namespace")
        .and_then(Data::as_str)
        .ok_or_else(|| TemplateError::invalid_argument("promServer", "expected a namespaced name"))?;
    Ok(Data::Str(format!("{PROMETHEUS_SERVICE_NAME}.{namespace}")))
}

/// `{label_<k>="<v>"}` from the metric target annotation, empty when absent.
fn rso_target_label(args: &[Data]) -> Result<Data, TemplateError> {
    arity("rsoTargetLabel", args, 1)?;
    let pair = args[0]
        .field("Annotations")
        .and_then(|a| a.field(ANNOTATION_METRIC_TARGET))
        .and_then(Data::as_str);
    let label = pair
        .map(|p| p.split('=').collect::<Vec<_>>())
        .filter(|parts| parts.len() == 2)
        .map(|parts| format!("{{label_{}=\"{}\"}}", parts[0], parts[1]))
        .unwrap_or_default();
    Ok(Data::Str(label))
}

fn default(args: &[Data]) -> Result<Data, TemplateError> {
    arity("default", args, 2)?;
    if args[1].is_empty() {
        Ok(args[0].clone())
    } else {
        Ok(args[1].clone())
    }
}

fn quote(args: &[Data]) -> Result<Data, TemplateError> {
    arity("quote", args, 1)?;
    let text = args[0].to_string();
    serde_json::to_string(&text)
        .map(Data::Str)
        .map_err(|e| TemplateError::invalid_argument("quote", e.to_string()))
}

fn upper(args: &[Data]) -> Result<Data, TemplateError> {
    arity("upper", args, 1)?;
    Ok(Data::Str(args[0].to_string().to_uppercase()))
}

fn lower(args: &[Data]) -> Result<Data, TemplateError> {
    arity("lower", args, 1)?;
    Ok(Data::Str(args[0].to_string().to_lowercase()))
}

fn trim(args: &[Data]) -> Result<Data, TemplateError> {
    arity("trim", args, 1)?;
    Ok(Data::Str(args[0].to_string().trim().to_string()))
}

fn to_string(args: &[Data]) -> Result<Data, TemplateError> {
    arity("toString", args, 1)?;
    Ok(Data::Str(args[0].to_string()))
}

/// `index collection key...` for keys that are not valid field names.
fn index(args: &[Data]) -> Result<Data, TemplateError> {
    let Some((collection, keys)) = args.split_first() else {
        return Err(TemplateError::invalid_argument("index", "missing collection"));
    };
    let mut current = collection.clone();
    for key in keys {
        current = match (&current, key) {
            (Data::Map(map), Data::Str(k)) => map.get(k).cloned().unwrap_or(Data::Null),
            (Data::List(items), k) => {
                let idx = k
                    .as_int()
                    .and_then(|i| usize::try_from(i).ok())
                    .ok_or_else(|| TemplateError::invalid_argument("index", "list index must be a non-negative integer"))?;
                items.get(idx).cloned().ok_or_else(|| {
                    TemplateError::invalid_argument("index", format!("index out of range: {idx}"))
                })?
            }
            (Data::Null, _) => Data::Null,
            _ => {
                return Err(TemplateError::invalid_argument(
                    "index",
                    "can't index item",
                ))
            }
        };
    }
    Ok(current)
}

/// Build a string map value.
pub fn string_map(map: &BTreeMap<String, String>) -> Data {
    Data::Map(
        map.iter()
            .map(|(k, v)| (k.clone(), Data::Str(v.clone())))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Container, ObjectMeta, Quantity};
    use chrono::{Duration, Utc};

    fn call(name: &str, args: Vec<Data>) -> Result<Data, TemplateError> {
        lookup(name).expect("function exists")(&args)
    }

    #[test]
    fn test_duration() {
        let start = Utc::now();
        let end = start + Duration::seconds(5);
        assert_eq!(call("duration", vec![Data::Time(start), Data::Time(end)]).unwrap(), Data::Float(5.0));
        assert_eq!(call("duration", vec![Data::Time(end), Data::Time(start)]).unwrap(), Data::Float(0.0));
        assert_eq!(call("duration", vec![Data::Null, Data::Time(end)]).unwrap(), Data::Float(0.0));
        assert!(call("duration", vec![Data::Str("x".into()), Data::Time(end)]).is_err());
    }

    #[test]
    fn test_percent() {
        assert_eq!(call("percent", vec![Data::Int(100), Data::Int(5)]).unwrap(), Data::Str("5".into()));
        assert_eq!(call("percent", vec![Data::Int(999), Data::Int(50)]).unwrap(), Data::Str("499".into()));
        assert!(call("percent", vec![Data::Str("a".into()), Data::Int(5)]).is_err());
    }

    #[test]
    fn test_resource_requests_weighted() {
        let pod = Pod {
            metadata: ObjectMeta::new("default", "testpod1"),
            containers: vec![Container {
                name: "testContainer1".to_string(),
                requests: [
                    ("cpu".to_string(), "200m".parse::<Quantity>().unwrap()),
                    ("memory".to_string(), "5000".parse::<Quantity>().unwrap()),
                ]
                .into(),
            }],
        };
        let result = call(
            "resourceRequests",
            vec![Data::Pods(vec![pod]), Data::Str("cpu=0.05,memory=0.005".into())],
        )
        .unwrap();
        assert_eq!(result.to_string(), "25010");

        assert!(call("resourceRequests", vec![Data::Pods(vec![]), Data::Str("cpu".into())]).is_err());
    }

    #[test]
    fn test_prom_server() {
        let nn = Data::Map([("Name".to_string(), Data::Str("exp".into())), ("Namespace".to_string(), Data::Str("tuning".into()))].into());
        assert_eq!(call("promServer", vec![nn]).unwrap(), Data::Str("rso-prometheus.tuning".into()));
    }

    #[test]
    fn test_rso_target_label() {
        let meta = |annotation: Option<&str>| {
            let mut annotations = BTreeMap::new();
            if let Some(a) = annotation {
                annotations.insert(ANNOTATION_METRIC_TARGET.to_string(), a.to_string());
            }
            Data::Map([("Annotations".to_string(), string_map(&annotations))].into())
        };
        assert_eq!(
            call("rsoTargetLabel", vec![meta(Some("app=web"))]).unwrap(),
            Data::Str("{label_app=\"web\"}".into())
        );
        assert_eq!(call("rsoTargetLabel", vec![meta(Some("broken"))]).unwrap(), Data::Str(String::new()));
        assert_eq!(call("rsoTargetLabel", vec![meta(None)]).unwrap(), Data::Str(String::new()));
    }

    #[test]
    fn test_helpers() {
        assert_eq!(call("default", vec![Data::Str("x".into()), Data::Null]).unwrap(), Data::Str("x".into()));
        assert_eq!(call("default", vec![Data::Str("x".into()), Data::Int(3)]).unwrap(), Data::Int(3));
        assert_eq!(call("quote", vec![Data::Str("a\"b".into())]).unwrap(), Data::Str("\"a\\\"b\"".into()));
        assert_eq!(call("upper", vec![Data::Str("ab".into())]).unwrap(), Data::Str("AB".into()));
        assert_eq!(call("trim", vec![Data::Str(" ab ".into())]).unwrap(), Data::Str("ab".into()));
        assert_eq!(call("toString", vec![Data::Int(7)]).unwrap(), Data::Str("7".into()));

        let labels = string_map(&[("app.kubernetes.io/name".to_string(), "web".to_string())].into());
        assert_eq!(
            call("index", vec![labels, Data::Str("app.kubernetes.io/name".into())]).unwrap(),
            Data::Str("web".into())
        );
        assert!(lookup("env").is_none());
    }
}
