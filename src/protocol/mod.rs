//! Wire protocol: envelopes, newline-delimited framing, and request routes
//!
//! Every message on the bus is an [`Envelope`]. Envelopes travel as one JSON
//! object per line:
//!
//! ```text
//! {"channel":"metrics","source":"first","values":[1,2,3]}\n
//! ```

mod codec;
mod envelope;
mod route;

pub use codec::{decode, encode, FrameDecoder, FrameStream};
pub use envelope::{Envelope, Registration, DEFAULT_SCHEME, MAIN_ID};
pub use route::Route;
