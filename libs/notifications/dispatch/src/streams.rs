use stream_worker::StreamDef;

/// Queued email/SMS deliveries
pub struct DeliveryStream;

impl StreamDef for DeliveryStream {
    const STREAM_NAME: &'static str = "notificacoes:entregas";
    const CONSUMER_GROUP: &'static str = "dispatch-workers";
    const DLQ_STREAM: &'static str = "notificacoes:dlq";
    const MAX_LENGTH: i64 = 50_000;
}
