//! Pixel-space to point-space coordinate reconciliation.
//!
//! Recognition happens on a raster at some DPI; the output document uses
//! the page's native point dimensions. The mapping is an explicit affine
//! scale, never an implicit DPI assumption.

use crate::models::BoundingBox;

/// Affine transform from recognition pixel space into page point space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageTransform {
    pub scale_x: f64,
    pub scale_y: f64,
    point_width: f64,
    point_height: f64,
}

impl PageTransform {
    /// Scale factors are `page_point_dimensions / raster_pixel_dimensions`.
    pub fn from_dimensions(
        point_width: f64,
        point_height: f64,
        pixel_width: u32,
        pixel_height: u32,
    ) -> Self {
        let scale_x = if pixel_width == 0 {
            1.0
        } else {
            point_width / pixel_width as f64
        };
        let scale_y = if pixel_height == 0 {
            1.0
        } else {
            point_height / pixel_height as f64
        };
        Self {
            scale_x,
            scale_y,
            point_width,
            point_height,
        }
    }

    /// Map a pixel-space box into point space and clamp it into the page.
    pub fn apply(&self, bbox: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x: bbox.x * self.scale_x,
            y: bbox.y * self.scale_y,
            width: bbox.width * self.scale_x,
            height: bbox.height * self.scale_y,
        }
        .clamp_to(self.point_width, self.point_height)
    }

    pub fn point_width(&self) -> f64 {
        self.point_width
    }

    pub fn point_height(&self) -> f64 {
        self.point_height
    }
}
