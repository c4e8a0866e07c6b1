pub mod cert_list;
pub mod hcert;
