//! Outbound request signing.

mod sigv4;

pub use sigv4::{
    canonical_request, derive_signing_key, sign, uri_encode, SignedRequest, SigningParams,
    UnsignedRequest, ALGORITHM, URI_ENCODE_SET,
};
