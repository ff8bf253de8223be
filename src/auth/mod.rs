//! Dashboard auth: possession of a loan's own 48-hex token is sole
//! authority for reading that loan (spec §1 Non-goals — no identities).

pub mod middleware;
