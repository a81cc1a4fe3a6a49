pub mod algorithm;
pub mod canonical;
pub mod classify;
pub mod digest;
pub mod ds;
pub mod key_tag;
pub mod keycache;
pub mod nsec;
pub mod nsec3;
pub mod trust_anchor;
pub mod validator;
pub mod verify;

pub use algorithm::Algorithm;
pub use classify::{classify, ResponseClassification};
pub use digest::DigestType;
pub use key_tag::key_tag;
pub use keycache::{KeyCache, KeyEntry};
pub use nsec3::IterationPolicy;
pub use trust_anchor::TrustAnchorStore;
pub use validator::{PrimingResolver, Validator};
pub use verify::{SigBudget, SigVerifier};

/// Stable reason tokens for failed (or downgraded) validations, forming a
/// dotted `failed.<phase>.<specifics>` hierarchy that tests and operators
/// match exactly.
pub mod reason {
    pub const FAILED_CLASSIFICATION: &str = "failed.classification";

    pub const FAILED_ANSWER_POSITIVE: &str = "failed.answer.positive";
    pub const FAILED_ANSWER_ANY: &str = "failed.answer.any";
    pub const FAILED_ANSWER_CNAME: &str = "failed.answer.cname";
    /// A positive answer that claimed wildcard synthesis without carrying
    /// the matching non-existence proof.
    pub const FAILED_ANSWER_POSITIVE_NODATA: &str = "failed.answer.positive_nodata";

    pub const FAILED_NODATA_NSEC: &str = "failed.nodata.nsec_bogus";
    pub const FAILED_NODATA_NSEC3: &str = "failed.nodata.nsec3_bogus";
    pub const FAILED_NODATA_MISSING: &str = "failed.nodata.missing_proof";

    pub const FAILED_NXDOMAIN_NSEC: &str = "failed.nxdomain.nsec_bogus";
    pub const FAILED_NXDOMAIN_NSEC3: &str = "failed.nxdomain.nsec3_bogus";
    pub const INSECURE_NXDOMAIN_NSEC3: &str = "failed.nxdomain.nsec3_insecure";
    pub const FAILED_NXDOMAIN_MISSING: &str = "failed.nxdomain.missing_proof";

    pub const FAILED_REFERRAL: &str = "failed.referral";
    pub const FAILED_CNAME_CHAIN: &str = "failed.cname.chain_too_long";

    pub const FAILED_FINDKEY_DS: &str = "failed.findkey.ds";
    pub const FAILED_FINDKEY_DNSKEY: &str = "failed.findkey.dnskey";
    pub const FAILED_FINDKEY_NXDOMAIN: &str = "failed.findkey.nxdomain";

    pub const CANCELLED: &str = "failed.cancelled";
}

/// Validator-wide constants.
pub mod constants {
    /// EDNS payload advertised on upstream queries (RFC 4035 wants room
    /// for signatures).
    pub const DNSSEC_UDP_SIZE: u16 = 4096;

    /// Longest CNAME chain followed before a loop is assumed.
    pub const MAX_CNAME_CHAIN: usize = 11;

    /// Default cap on signature verifications per response.
    pub const DEFAULT_MAX_RRSIGS: usize = 12;
}
