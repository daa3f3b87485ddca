//! Custom tracing layers for SPY nodes

use tracing::{Subscriber, span};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::{Format, Json, JsonFields};
use tracing_subscriber::{
    layer::{Context, Layer},
    registry::LookupSpan,
};

use crate::config::JsonFormat;
use crate::context::{NodeContextData, NodeContextGuard};

/// Layer that attaches the active node context to new spans
///
/// When a [`NodeContextGuard`] is active, every span created under it
/// carries a [`NodeContextExtension`] that later layers can read.
#[derive(Debug, Default)]
pub struct NodeContextLayer;

impl NodeContextLayer {
    pub fn new() -> Self {
        Self
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct NodeContextExtension {
    pub data: NodeContextData,
}

impl<S> Layer<S> for NodeContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        if let Some(node_ctx) = NodeContextGuard::current() {
            span.extensions_mut()
                .insert(NodeContextExtension { data: node_ctx });
        }
    }
}

/// JSONL formatting layer writing to `writer`
pub fn jsonl_layer<S, W>(writer: W, format: &JsonFormat) -> tracing_subscriber::fmt::Layer<S, JsonFields, Format<Json>, W>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    W: for<'writer> MakeWriter<'writer> + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(format.span_list)
        .flatten_event(format.flatten)
        .with_file(format.source_location)
        .with_line_number(format.source_location)
        .with_thread_ids(format.thread_ids)
        .with_thread_names(format.thread_ids)
        .with_writer(writer)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::Ipv4Addr;
    use std::sync::{Arc, Mutex};

    use tracing_subscriber::layer::SubscriberExt;

    use super::*;
    use crate::context::NodeKind;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_jsonl_layer_writes_one_object_per_line() {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::registry()
            .with(NodeContextLayer::new())
            .with(jsonl_layer(captured.clone(), &JsonFormat::default()));

        tracing::subscriber::with_default(subscriber, || {
            let _guard = NodeContextGuard::new(Ipv4Addr::new(10, 0, 0, 1), NodeKind::Simulated);
            let span = tracing::info_span!("route", node = "10.0.0.1");
            let _entered = span.enter();
            tracing::info!(next_hop = "10.0.0.2", "forwarding");
            tracing::warn!("queue full");
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["message"], "forwarding");
        assert_eq!(lines[0]["next_hop"], "10.0.0.2");
        assert_eq!(lines[0]["span"]["node"], "10.0.0.1");
        assert_eq!(lines[1]["level"], "WARN");
    }
}
