pub mod chart_transport;
pub mod frame_decoder;
pub mod text_stream_transport;
pub mod transport;

pub use chart_transport::ChartHttpTransport;
pub use frame_decoder::{DecodedFrame, decode};
pub use text_stream_transport::TextStreamTransport;
pub use transport::{EventStream, Transport, TransportEvent, TransportHandle};
