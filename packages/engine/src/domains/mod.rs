// Business-logic use cases, generic over the capability traits in `kernel`.
//
// IMPORTANT: Domains hold business logic only, no infrastructure wiring.
// Concrete clients belong in `kernel`.

pub mod incidents;
