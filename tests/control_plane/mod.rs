mod crud_over_grpc;
mod list_then_watch;
mod restart;
