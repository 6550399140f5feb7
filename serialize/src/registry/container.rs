use std::marker::PhantomData;

use uuid::Uuid;

use super::reflect::{Reflect, TypeUuid};

/// Element access for a container class.
///
/// Containers are generic: a stream stores their elements as child nodes
/// named `element`, and the loader rebuilds the container by clearing it
/// and pushing freshly created elements in stream order.
pub trait ContainerHandler: Send + Sync {
    /// Declared element type. Elements may be of a derived type.
    fn element_type(&self) -> Uuid;

    fn elements<'a>(&self, container: &'a dyn Reflect) -> Vec<&'a dyn Reflect>;

    fn clear(&self, container: &mut dyn Reflect);

    /// Append an element. Returns `false` if either side has the wrong type.
    fn push(&self, container: &mut dyn Reflect, element: Box<dyn Reflect>) -> bool;
}

/// [`ContainerHandler`] for `Vec<T>`.
pub struct VecHandler<T>(PhantomData<fn() -> T>);

impl<T> VecHandler<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for VecHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TypeUuid> ContainerHandler for VecHandler<T> {
    fn element_type(&self) -> Uuid {
        T::type_uuid()
    }

    fn elements<'a>(&self, container: &'a dyn Reflect) -> Vec<&'a dyn Reflect> {
        container
            .downcast_ref::<Vec<T>>()
            .map(|items| items.iter().map(|item| item as &dyn Reflect).collect())
            .unwrap_or_default()
    }

    fn clear(&self, container: &mut dyn Reflect) {
        if let Some(items) = container.downcast_mut::<Vec<T>>() {
            items.clear();
        }
    }

    fn push(&self, container: &mut dyn Reflect, element: Box<dyn Reflect>) -> bool {
        let Some(items) = container.downcast_mut::<Vec<T>>() else {
            return false;
        };
        match element.into_any().downcast::<T>() {
            Ok(element) => {
                items.push(*element);
                true
            }
            Err(_) => false,
        }
    }
}
