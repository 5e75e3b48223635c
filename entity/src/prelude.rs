pub use super::image_variants::Entity as ImageVariants;
pub use super::images::Entity as Images;
