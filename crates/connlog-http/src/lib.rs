// # HTTP Adapters
//
// Outbound HTTP collaborators of the connection log worker:
//
// - [`HttpNotifier`]: POSTs offline notifications to the notification service
// - [`DeviceRegistryClient`]: PUTs connectivity to the device repository
//
// ## Behaviour
//
// - One request per call, bounded by a client-wide timeout
// - No retries: the reconciler and the message stream own redelivery
// - Any non-2xx status is an error, with 401/403, 404, 429 and 5xx
//   described specifically
//
// ## Security
//
// The device repository token never appears in logs or `Debug` output.

mod notifier;
mod registry;
mod status;

pub use notifier::HttpNotifier;
pub use registry::DeviceRegistryClient;
