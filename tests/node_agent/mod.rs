mod fake_hypervisor;
mod reconcile_over_grpc;
