use std::ops::{Add, Range, Sub};

use itertools::{Itertools, Product};
use nalgebra::{point, vector};
use nalgebra::{Point2, Scalar, Vector2};
use num_traits::{Float, NumCast, ToPrimitive, Zero};

/// An axis-aligned box in min/max form.
///
/// Minima are inclusive, maxima are exclusive. Boxes that merely touch at
/// an edge do therefore not intersect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds<T> {
    pub x_min: T,
    pub y_min: T,
    pub x_max: T,
    pub y_max: T,
}

impl<T> Bounds<T> {
    pub fn zero() -> Self
    where
        T: Zero,
    {
        Self {
            x_min: T::zero(),
            y_min: T::zero(),
            x_max: T::zero(),
            y_max: T::zero(),
        }
    }

    pub fn rect(&self) -> Rect<T>
    where
        T: Copy,
        T: Scalar,
        T: Sub<T, Output = T>,
    {
        Rect {
            offs: point![self.x_min, self.y_min],
            size: vector![self.x_max - self.x_min, self.y_max - self.y_min],
        }
    }

    pub fn is_empty(&self) -> bool
    where
        T: PartialOrd,
    {
        self.x_max <= self.x_min || self.y_max <= self.y_min
    }

    pub fn range_x(&self) -> Range<T>
    where
        T: Copy,
    {
        (self.x_min)..(self.x_max)
    }

    pub fn range_y(&self) -> Range<T>
    where
        T: Copy,
    {
        (self.y_min)..(self.y_max)
    }

    pub fn range_iter(&self) -> Product<Range<T>, Range<T>>
    where
        T: Copy,
        Range<T>: Iterator<Item = T>,
    {
        self.range_x().cartesian_product(self.range_y())
    }

    pub fn clip(&self, other: &Bounds<T>) -> Self
    where
        T: Copy,
        T: PartialOrd,
    {
        fn min<T: Copy + PartialOrd>(a: T, b: T) -> T {
            if a < b {
                a
            } else {
                b
            }
        }

        fn max<T: Copy + PartialOrd>(a: T, b: T) -> T {
            if a > b {
                a
            } else {
                b
            }
        }

        Bounds {
            x_min: max(self.x_min, other.x_min),
            y_min: max(self.y_min, other.y_min),
            x_max: min(self.x_max, other.x_max),
            y_max: min(self.y_max, other.y_max),
        }
    }

    pub fn intersects(&self, other: &Bounds<T>) -> bool
    where
        T: PartialOrd,
    {
        self.x_min < other.x_max
            && self.x_max > other.x_min
            && self.y_min < other.y_max
            && self.y_max > other.y_min
    }

    pub fn contains(&self, other: &Bounds<T>) -> bool
    where
        T: PartialOrd,
    {
        self.x_min <= other.x_min
            && self.x_max >= other.x_max
            && self.y_min <= other.y_min
            && self.y_max >= other.y_max
    }

    pub fn contains_point(&self, point: &Point2<T>) -> bool
    where
        T: Scalar,
        T: PartialOrd,
    {
        self.x_min <= point.x
            && self.x_max > point.x
            && self.y_min <= point.y
            && self.y_max > point.y
    }

    pub fn translate(&self, offset: &Vector2<T>) -> Self
    where
        T: Copy,
        T: Scalar,
        T: Add<T, Output = T>,
    {
        Self {
            x_min: self.x_min + offset.x,
            y_min: self.y_min + offset.y,
            x_max: self.x_max + offset.x,
            y_max: self.y_max + offset.y,
        }
    }

    /// Scale all coordinates around the origin.
    pub fn scale(&self, factor: T) -> Self
    where
        T: Copy,
        T: std::ops::Mul<T, Output = T>,
    {
        Self {
            x_min: self.x_min * factor,
            y_min: self.y_min * factor,
            x_max: self.x_max * factor,
            y_max: self.y_max * factor,
        }
    }

    pub fn round_outwards(&self) -> Self
    where
        T: Float,
    {
        Self {
            x_min: self.x_min.floor(),
            y_min: self.y_min.floor(),
            x_max: self.x_max.ceil(),
            y_max: self.y_max.ceil(),
        }
    }

    /// Cast all coordinates to another scalar type.
    ///
    /// Panics if a coordinate is not representable in the target type.
    pub fn cast_unchecked<U>(&self) -> Bounds<U>
    where
        T: Copy,
        T: ToPrimitive,
        U: NumCast,
    {
        Bounds {
            x_min: U::from(self.x_min).unwrap(),
            y_min: U::from(self.y_min).unwrap(),
            x_max: U::from(self.x_max).unwrap(),
            y_max: U::from(self.y_max).unwrap(),
        }
    }
}

impl Bounds<i64> {
    /// Map a pixel box to the box of tile indices covering it.
    ///
    /// Minima round towards negative infinity, maxima away from it, so the
    /// result is exact for coordinates on either side of the origin.
    pub fn tiled(&self, tile_size: &Vector2<i64>) -> Bounds<i64> {
        fn ceil_div(value: i64, divisor: i64) -> i64 {
            value.div_euclid(divisor) + (value.rem_euclid(divisor) != 0) as i64
        }

        Bounds {
            x_min: self.x_min.div_euclid(tile_size.x),
            y_min: self.y_min.div_euclid(tile_size.y),
            x_max: ceil_div(self.x_max, tile_size.x),
            y_max: ceil_div(self.y_max, tile_size.y),
        }
    }
}

impl<T> From<Rect<T>> for Bounds<T>
where
    T: Copy,
    T: Scalar,
    T: Add<T, Output = T>,
{
    fn from(r: Rect<T>) -> Self {
        r.bounds()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect<T: Scalar> {
    pub offs: Point2<T>,
    pub size: Vector2<T>,
}

impl<T: Scalar> Rect<T> {
    pub fn new(offs: Point2<T>, size: Vector2<T>) -> Self {
        Self { offs, size }
    }

    pub fn clip(&self, other: &Rect<T>) -> Self
    where
        T: Copy,
        T: PartialOrd,
        T: Add<T, Output = T>,
        T: Sub<T, Output = T>,
    {
        self.bounds().clip(&other.bounds()).rect()
    }

    pub fn intersects(&self, other: &Rect<T>) -> bool
    where
        T: Copy,
        T: PartialOrd,
        T: Add<T, Output = T>,
    {
        self.bounds().intersects(&other.bounds())
    }

    pub fn contains_point(&self, point: &Point2<T>) -> bool
    where
        T: Copy,
        T: PartialOrd,
        T: Add<T, Output = T>,
    {
        self.bounds().contains_point(point)
    }

    pub fn round(&self) -> Self
    where
        T: Float,
    {
        Self {
            offs: point![self.offs.x.round(), self.offs.y.round()],
            size: vector![self.size.x.round(), self.size.y.round()],
        }
    }

    pub fn bounds(&self) -> Bounds<T>
    where
        T: Copy,
        T: Add<T, Output = T>,
    {
        Bounds {
            x_min: self.offs.x,
            y_min: self.offs.y,
            x_max: self.offs.x + self.size.x,
            y_max: self.offs.y + self.size.y,
        }
    }
}

impl<T> From<Bounds<T>> for Rect<T>
where
    T: Copy,
    T: Scalar,
    T: Sub<T, Output = T>,
{
    fn from(b: Bounds<T>) -> Self {
        b.rect()
    }
}

/// The visible part of the content surface together with the view scale.
///
/// The rect is in content units; the scale maps content units to pixels.
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub r: Rect<f64>,
    pub scale: f64,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tiled_positive() {
        let px = Bounds {
            x_min: 0,
            y_min: 0,
            x_max: 1000,
            y_max: 1000,
        };
        let tiles = px.tiled(&vector![256, 256]);

        assert_eq!(tiles.x_min, 0);
        assert_eq!(tiles.y_min, 0);
        assert_eq!(tiles.x_max, 4);
        assert_eq!(tiles.y_max, 4);
        assert_eq!(tiles.range_iter().count(), 16);
    }

    #[test]
    fn tiled_exact_boundary() {
        let px = Bounds {
            x_min: 256,
            y_min: 512,
            x_max: 512,
            y_max: 768,
        };
        let tiles = px.tiled(&vector![256, 256]);

        assert_eq!(tiles.x_min, 1);
        assert_eq!(tiles.x_max, 2);
        assert_eq!(tiles.y_min, 2);
        assert_eq!(tiles.y_max, 3);
    }

    #[test]
    fn tiled_negative() {
        let px = Bounds {
            x_min: -10,
            y_min: -300,
            x_max: 10,
            y_max: -200,
        };
        let tiles = px.tiled(&vector![256, 256]);

        assert_eq!(tiles.x_min, -1);
        assert_eq!(tiles.x_max, 1);
        assert_eq!(tiles.y_min, -2);
        assert_eq!(tiles.y_max, -1);
    }

    #[test]
    fn intersects_is_edge_exclusive() {
        let a = Bounds {
            x_min: 0.0,
            y_min: 0.0,
            x_max: 1.0,
            y_max: 1.0,
        };
        let b = a.translate(&vector![1.0, 0.0]);

        assert!(!a.intersects(&b));
        assert!(a.intersects(&a));
    }

    #[test]
    fn contains_box() {
        let outer = Bounds {
            x_min: 0.0,
            y_min: 0.0,
            x_max: 4.0,
            y_max: 4.0,
        };
        let inner = Bounds {
            x_min: 1.0,
            y_min: 1.0,
            x_max: 3.0,
            y_max: 3.0,
        };

        assert!(outer.contains(&inner));
        assert!(outer.contains(&outer));
        assert!(!inner.contains(&outer));
    }

    #[test]
    fn clip_to_intersection() {
        let a = Bounds {
            x_min: 0,
            y_min: 0,
            x_max: 10,
            y_max: 10,
        };
        let b = Bounds {
            x_min: 5,
            y_min: -5,
            x_max: 15,
            y_max: 5,
        };
        let c = a.clip(&b);

        assert_eq!(c.x_min, 5);
        assert_eq!(c.y_min, 0);
        assert_eq!(c.x_max, 10);
        assert_eq!(c.y_max, 5);
    }

    #[test]
    fn round_and_cast() {
        let b = Bounds {
            x_min: -0.25,
            y_min: 0.75,
            x_max: 1.25,
            y_max: 2.0,
        };
        let c = b.round_outwards().cast_unchecked::<i64>();

        assert_eq!(c.x_min, -1);
        assert_eq!(c.y_min, 0);
        assert_eq!(c.x_max, 2);
        assert_eq!(c.y_max, 2);
    }
}
