pub mod approval;
pub mod estimate;
pub mod identity;
pub mod invoice;
pub mod maintenance;
pub mod product;
